//! The validated device.
//!
//! A `DeviceVal` wraps the device of a backend together with the [`ValidationContext`] that every
//! object created from it reports through. Validated objects borrow the device instead of
//! holding a reference count on it: the borrow checker guarantees that the device, and with it
//! the context, is dropped after all of its objects.
//!
//! ```
//! # use rhi::backend::DeviceBackend;
//! # fn backend() -> Box<dyn DeviceBackend> { unimplemented!() }
//! # fn main() -> Result<(), rhi::Validated<rhi::BackendError>> {
//! # if true { return Ok(()); }
//! use rhi::{
//!     debug::ValidationContextCreateInfo,
//!     device::DeviceVal,
//!     query::{QueryPoolCreateInfo, QueryPoolVal, QueryType},
//! };
//!
//! let device = DeviceVal::new(backend(), ValidationContextCreateInfo::default());
//! let query_pool = QueryPoolVal::new(
//!     &device,
//!     QueryPoolCreateInfo {
//!         query_count: 16,
//!         ..QueryPoolCreateInfo::query_type(QueryType::Occlusion)
//!     },
//! )?;
//!
//! assert!(query_pool.set_query_state(0, true));
//! # Ok(())
//! # }
//! ```

use crate::{
    backend::DeviceBackend,
    debug::{
        MessageSeverity, ObjectInfo, ObjectType, ValidationContext, ValidationContextCreateInfo,
    },
    macros::impl_id_counter,
    ValidationError,
};
use std::num::NonZero;

/// A backend device, wrapped with validation.
#[derive(Debug)]
pub struct DeviceVal {
    handle: Box<dyn DeviceBackend>,
    context: ValidationContext,
    id: NonZero<u64>,
}

impl DeviceVal {
    /// Wraps `handle`, reporting through a new context built from `create_info`.
    pub fn new(handle: Box<dyn DeviceBackend>, create_info: ValidationContextCreateInfo) -> Self {
        let device = DeviceVal {
            handle,
            context: ValidationContext::new(create_info),
            id: Self::next_id(),
        };

        tracing::trace!(
            id = device.id.get(),
            strict = device.context.is_strict(),
            "created device",
        );

        device
    }

    /// Returns the wrapped backend device.
    #[inline]
    pub fn handle(&self) -> &dyn DeviceBackend {
        &*self.handle
    }

    /// Returns the validation context of the device.
    #[inline]
    pub fn context(&self) -> &ValidationContext {
        &self.context
    }

    /// Returns whether reported errors should be treated as hard failures.
    #[inline]
    pub fn is_strict(&self) -> bool {
        self.context.is_strict()
    }

    #[inline]
    pub(crate) fn object_info(&self) -> ObjectInfo {
        ObjectInfo {
            object_type: ObjectType::Device,
            id: self.id,
        }
    }

    /// Reports `err` as an error of `object` and hands it back, for use in `map_err`.
    pub(crate) fn report_error(
        &self,
        object: ObjectInfo,
        err: Box<ValidationError>,
    ) -> Box<ValidationError> {
        self.context
            .report(MessageSeverity::errors(), Some(object), &err.to_string());

        err
    }

    pub(crate) fn report_warning(&self, object: ObjectInfo, description: &str) {
        self.context
            .report(MessageSeverity::warnings(), Some(object), description);
    }
}

impl Drop for DeviceVal {
    fn drop(&mut self) {
        tracing::trace!(
            id = self.id.get(),
            errors = self.context.error_count(),
            warnings = self.context.warning_count(),
            "destroyed device",
        );
    }
}

impl_id_counter!(DeviceVal);

/// The capabilities shared by every object created from a [`DeviceVal`].
pub trait DeviceObject {
    /// Returns the device that the object was created from.
    fn device(&self) -> &DeviceVal;

    /// Returns the type and id of the object, as used in its messages.
    fn object_info(&self) -> ObjectInfo;

    /// Assigns a debug name to the object.
    ///
    /// The name is passed on to the backend, and used by the validation context to identify
    /// the object in its messages.
    fn set_debug_name(&self, name: &str);

    /// Returns the debug name of the object, if one was assigned.
    #[inline]
    fn debug_name(&self) -> Option<String> {
        self.device().context().object_name(self.object_info().id)
    }
}

#[cfg(test)]
mod tests {
    use super::DeviceObject;
    use crate::{
        debug::{MessageSeverity, ObjectType},
        query::{QueryPoolCreateInfo, QueryPoolVal, QueryType},
        ValidationError,
    };

    #[test]
    fn report_error_uses_object_name() {
        let (device, _calls) = mock_device!();
        let query_pool = QueryPoolVal::new(
            &device,
            QueryPoolCreateInfo {
                query_count: 2,
                ..QueryPoolCreateInfo::query_type(QueryType::Timestamp)
            },
        )
        .unwrap();
        query_pool.set_debug_name("frame timings");

        let err = device.report_error(
            query_pool.object_info(),
            Box::new(ValidationError {
                context: "offset".into(),
                problem: "is bad".into(),
            }),
        );
        assert_eq!(err.problem, "is bad");

        let messages = device.context().drain_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].severity, MessageSeverity::errors());
        assert_eq!(messages[0].object_type, Some(ObjectType::QueryPool));
        assert_eq!(messages[0].object_name.as_deref(), Some("frame timings"));
        assert_eq!(messages[0].description, "offset: is bad");
    }

    #[test]
    fn strict_mode_comes_from_create_info() {
        let (device, _) = mock_device!();
        assert!(!device.is_strict());

        let (device, _) = mock_device!(strict);
        assert!(device.is_strict());
    }
}
