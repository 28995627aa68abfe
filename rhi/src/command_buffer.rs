//! Recording of query commands, with validation.
//!
//! A [`CommandBufferVal`] checks that it is recording and that the query pools it is given belong
//! to its device, then hands each query command to the [`QueryPoolVal`], which validates and
//! forwards it.
//!
//! # Strict mode
//!
//! Every rejected command is reported through the validation context of the device. What the
//! caller sees afterwards depends on [`ValidationContextCreateInfo::strict`]:
//!
//! - If the context is not strict, the rejected command is absorbed: `Ok(())` is returned, and
//!   the backend never sees the command. Recording carries on with only valid commands.
//! - If the context is strict, the `ValidationError` is returned to the caller.
//!
//! [`ValidationContextCreateInfo::strict`]: crate::debug::ValidationContextCreateInfo::strict

use crate::{
    backend::CommandBufferBackend,
    debug::{ObjectInfo, ObjectType},
    device::{DeviceObject, DeviceVal},
    interop::d3d11::CommandBufferD3D11Desc,
    macros::impl_id_counter,
    query::QueryPoolVal,
    BackendError, Validated, ValidationError,
};
use smallvec::SmallVec;
use std::{fmt, num::NonZero, ptr};

/// A backend command buffer, wrapped with validation of its query commands.
pub struct CommandBufferVal<'d> {
    device: &'d DeviceVal,
    handle: Box<dyn CommandBufferBackend>,
    id: NonZero<u64>,

    is_recording: bool,
    // (query pool id, offset) of every query begun in this recording and not yet ended.
    active_queries: SmallVec<[(NonZero<u64>, u32); 4]>,
}

impl<'d> CommandBufferVal<'d> {
    /// Wraps a backend command buffer. It must not be recording.
    pub fn from_handle(
        device: &'d DeviceVal,
        handle: Box<dyn CommandBufferBackend>,
    ) -> CommandBufferVal<'d> {
        let command_buffer = CommandBufferVal {
            device,
            handle,
            id: Self::next_id(),
            is_recording: false,
            active_queries: SmallVec::new(),
        };

        tracing::trace!(id = command_buffer.id.get(), "created command buffer");

        command_buffer
    }

    /// Wraps an existing `ID3D11DeviceContext`.
    pub fn from_d3d11(
        device: &'d DeviceVal,
        desc: &CommandBufferD3D11Desc,
    ) -> Result<CommandBufferVal<'d>, Validated<BackendError>> {
        let handle = device.d3d11()?.create_command_buffer_d3d11(desc)?;

        Ok(Self::from_handle(device, handle))
    }

    /// Returns the wrapped backend command buffer.
    #[inline]
    pub fn handle(&self) -> &dyn CommandBufferBackend {
        &*self.handle
    }

    /// Returns whether the command buffer is between [`begin`](Self::begin) and
    /// [`end`](Self::end).
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    /// Starts recording.
    pub fn begin(&mut self) -> Result<(), Validated<BackendError>> {
        if let Err(err) = self.escalate(self.validate_begin()) {
            return Err(err.into());
        }

        if self.is_recording {
            // Absorbed.
            return Ok(());
        }

        self.handle.begin()?;
        self.is_recording = true;

        Ok(())
    }

    fn validate_begin(&self) -> Result<(), Box<ValidationError>> {
        if self.is_recording {
            return Err(self.report_error(Box::new(ValidationError {
                context: "begin".into(),
                problem: "the command buffer is already recording".into(),
            })));
        }

        Ok(())
    }

    /// Ends recording.
    ///
    /// Every query that is still active is reported with a warning, and no longer tracked by
    /// this command buffer. If the backend fails to end, the command buffer is still recording
    /// and its active queries are kept.
    pub fn end(&mut self) -> Result<(), Validated<BackendError>> {
        if let Err(err) = self.escalate(self.validate_recording("end")) {
            return Err(err.into());
        }

        if !self.is_recording {
            return Ok(());
        }

        self.handle.end()?;
        self.is_recording = false;

        for (query_pool_id, offset) in self.active_queries.drain(..) {
            self.device.report_warning(
                ObjectInfo {
                    object_type: ObjectType::CommandBuffer,
                    id: self.id,
                },
                &format!(
                    "recording ended while the query at offset {} of query pool #{} is still \
                    active",
                    offset, query_pool_id,
                ),
            );
        }

        Ok(())
    }

    /// Begins the query at `offset` of `query_pool`.
    pub fn begin_query(
        &mut self,
        query_pool: &QueryPoolVal<'_>,
        offset: u32,
    ) -> Result<(), Box<ValidationError>> {
        let result = self
            .validate_query_command("begin_query", query_pool)
            .and_then(|()| query_pool.begin_query(offset));

        if result.is_ok() {
            self.active_queries
                .push((query_pool.object_info().id, offset));
        }

        self.escalate(result)
    }

    /// Ends the query at `offset` of `query_pool`.
    pub fn end_query(
        &mut self,
        query_pool: &QueryPoolVal<'_>,
        offset: u32,
    ) -> Result<(), Box<ValidationError>> {
        let result = self
            .validate_query_command("end_query", query_pool)
            .and_then(|()| query_pool.end_query(offset));

        if result.is_ok() {
            let key = (query_pool.object_info().id, offset);

            if let Some(index) = self.active_queries.iter().position(|&entry| entry == key) {
                self.active_queries.swap_remove(index);
            }
        }

        self.escalate(result)
    }

    /// Resets the queries in `offset..offset + number` of `query_pool`.
    pub fn reset_queries(
        &mut self,
        query_pool: &QueryPoolVal<'_>,
        offset: u32,
        number: u32,
    ) -> Result<(), Box<ValidationError>> {
        let result = self
            .validate_query_command("reset_queries", query_pool)
            .and_then(|()| query_pool.reset_queries(offset, number));

        if result.is_ok() {
            let query_pool_id = query_pool.object_info().id;
            let range = offset..offset.saturating_add(number);

            self.active_queries
                .retain(|&mut (id, offset)| id != query_pool_id || !range.contains(&offset));
        }

        self.escalate(result)
    }

    /// Writes a timestamp into the query at `offset` of `query_pool`.
    pub fn write_timestamp(
        &mut self,
        query_pool: &QueryPoolVal<'_>,
        offset: u32,
    ) -> Result<(), Box<ValidationError>> {
        let result = self
            .validate_query_command("write_timestamp", query_pool)
            .and_then(|()| query_pool.write_timestamp(offset));

        self.escalate(result)
    }

    fn validate_query_command(
        &self,
        command: &'static str,
        query_pool: &QueryPoolVal<'_>,
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording(command)?;

        if !ptr::eq(query_pool.device(), self.device) {
            return Err(self.report_error(Box::new(ValidationError {
                context: command.into(),
                problem: "`query_pool` was not created from the same device as the command \
                    buffer"
                    .into(),
            })));
        }

        Ok(())
    }

    fn validate_recording(&self, command: &'static str) -> Result<(), Box<ValidationError>> {
        if !self.is_recording {
            return Err(self.report_error(Box::new(ValidationError {
                context: command.into(),
                problem: "the command buffer is not recording".into(),
            })));
        }

        Ok(())
    }

    /// Absorbs the error unless the context is strict. The error has already been reported.
    fn escalate(
        &self,
        result: Result<(), Box<ValidationError>>,
    ) -> Result<(), Box<ValidationError>> {
        match result {
            Err(_) if !self.device.is_strict() => Ok(()),
            result => result,
        }
    }

    fn report_error(&self, err: Box<ValidationError>) -> Box<ValidationError> {
        self.device.report_error(self.object_info(), err)
    }
}

impl DeviceObject for CommandBufferVal<'_> {
    #[inline]
    fn device(&self) -> &DeviceVal {
        self.device
    }

    #[inline]
    fn object_info(&self) -> ObjectInfo {
        ObjectInfo {
            object_type: ObjectType::CommandBuffer,
            id: self.id,
        }
    }

    fn set_debug_name(&self, name: &str) {
        tracing::trace!(id = self.id.get(), name, "renamed command buffer");
        self.handle.set_debug_name(name);
        self.device.context().set_object_name(self.id, name);
    }
}

impl Drop for CommandBufferVal<'_> {
    fn drop(&mut self) {
        if self.is_recording {
            self.device
                .report_warning(self.object_info(), "destroyed while recording");
        }

        self.device.context().forget_object(self.id);
        tracing::trace!(id = self.id.get(), "destroyed command buffer");
    }
}

impl fmt::Debug for CommandBufferVal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBufferVal")
            .field("handle", &self.handle)
            .field("id", &self.id)
            .field("is_recording", &self.is_recording)
            .field("active_queries", &self.active_queries)
            .finish_non_exhaustive()
    }
}

impl_id_counter!(CommandBufferVal<'d>);

#[cfg(test)]
mod tests {
    use super::CommandBufferVal;
    use crate::{
        debug::MessageSeverity,
        device::{DeviceObject, DeviceVal},
        query::{QueryPoolCreateInfo, QueryPoolVal, QueryType},
        tests::{Call, MockCommandBuffer},
        BackendError, Validated,
    };
    use parking_lot::Mutex;

    fn query_pool(device: &DeviceVal, query_type: QueryType) -> QueryPoolVal<'_> {
        QueryPoolVal::new(
            device,
            QueryPoolCreateInfo {
                query_count: 4,
                ..QueryPoolCreateInfo::query_type(query_type)
            },
        )
        .unwrap()
    }

    #[test]
    fn record_queries() {
        let (device, calls) = mock_device!();
        let occlusion = query_pool(&device, QueryType::Occlusion);
        let timestamps = query_pool(&device, QueryType::Timestamp);
        let mut command_buffer =
            CommandBufferVal::from_handle(&device, Box::new(MockCommandBuffer::new(&calls)));
        calls.take();

        command_buffer.begin().unwrap();
        command_buffer.reset_queries(&occlusion, 0, 4).unwrap();
        command_buffer.write_timestamp(&timestamps, 0).unwrap();
        command_buffer.begin_query(&occlusion, 1).unwrap();
        command_buffer.end_query(&occlusion, 1).unwrap();
        command_buffer.write_timestamp(&timestamps, 1).unwrap();
        command_buffer.end().unwrap();

        assert_eq!(
            calls.take(),
            [
                Call::CommandBufferBegin,
                Call::ResetQueries(0, 4),
                Call::EndQuery(0),
                Call::BeginQuery(1),
                Call::EndQuery(1),
                Call::EndQuery(1),
                Call::CommandBufferEnd,
            ],
        );
        assert_eq!(device.context().error_count(), 0);
        assert_eq!(device.context().warning_count(), 0);
    }

    #[test]
    fn non_strict_absorbs_errors() {
        let (device, calls) = mock_device!();
        let occlusion = query_pool(&device, QueryType::Occlusion);
        let mut command_buffer =
            CommandBufferVal::from_handle(&device, Box::new(MockCommandBuffer::new(&calls)));
        calls.take();

        // Not recording yet.
        command_buffer.begin_query(&occlusion, 0).unwrap();
        assert_eq!(occlusion.is_active(0), Some(false));

        command_buffer.begin().unwrap();
        command_buffer.begin().unwrap();
        command_buffer.begin_query(&occlusion, 0).unwrap();
        command_buffer.begin_query(&occlusion, 0).unwrap();
        command_buffer.end_query(&occlusion, 2).unwrap();
        command_buffer.reset_queries(&occlusion, 3, 2).unwrap();
        command_buffer.end_query(&occlusion, 0).unwrap();
        command_buffer.end().unwrap();
        command_buffer.end().unwrap();

        assert_eq!(device.context().error_count(), 6);
        assert_eq!(
            calls.take(),
            [
                Call::CommandBufferBegin,
                Call::BeginQuery(0),
                Call::EndQuery(0),
                Call::CommandBufferEnd,
            ],
        );
    }

    #[test]
    fn strict_returns_errors() {
        let (device, calls) = mock_device!(strict);
        let occlusion = query_pool(&device, QueryType::Occlusion);
        let mut command_buffer =
            CommandBufferVal::from_handle(&device, Box::new(MockCommandBuffer::new(&calls)));
        calls.take();

        assert!(command_buffer.begin_query(&occlusion, 0).is_err());
        assert!(matches!(command_buffer.end(), Err(Validated::ValidationError(_))));

        command_buffer.begin().unwrap();
        assert!(matches!(command_buffer.begin(), Err(Validated::ValidationError(_))));
        command_buffer.begin_query(&occlusion, 0).unwrap();

        let err = command_buffer.begin_query(&occlusion, 0).unwrap_err();
        assert_eq!(err.context, "begin_query.offset");
        assert_eq!(occlusion.is_active(0), Some(true));

        assert!(command_buffer.write_timestamp(&occlusion, 1).is_err());
        command_buffer.end_query(&occlusion, 0).unwrap();
        command_buffer.end().unwrap();

        assert_eq!(
            calls.take(),
            [
                Call::CommandBufferBegin,
                Call::BeginQuery(0),
                Call::EndQuery(0),
                Call::CommandBufferEnd,
            ],
        );
    }

    #[test]
    fn end_with_active_queries() {
        let (device, calls) = mock_device!();
        let occlusion = query_pool(&device, QueryType::Occlusion);
        let mut command_buffer =
            CommandBufferVal::from_handle(&device, Box::new(MockCommandBuffer::new(&calls)));

        command_buffer.begin().unwrap();
        command_buffer.begin_query(&occlusion, 0).unwrap();
        command_buffer.begin_query(&occlusion, 1).unwrap();
        command_buffer.begin_query(&occlusion, 2).unwrap();
        command_buffer.reset_queries(&occlusion, 2, 1).unwrap();
        command_buffer.end_query(&occlusion, 1).unwrap();
        device.context().drain_messages();

        command_buffer.end().unwrap();

        let messages = device.context().drain_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].severity, MessageSeverity::warnings());
        assert!(messages[0]
            .description
            .starts_with("recording ended while the query at offset 0 of query pool #"));
    }

    #[test]
    fn failed_end_keeps_active_queries() {
        let (device, calls) = mock_device!();
        let occlusion = query_pool(&device, QueryType::Occlusion);
        let mut command_buffer = CommandBufferVal::from_handle(
            &device,
            Box::new(MockCommandBuffer {
                end_error: Mutex::new(Some(BackendError::DeviceLost)),
                ..MockCommandBuffer::new(&calls)
            }),
        );

        command_buffer.begin().unwrap();
        command_buffer.begin_query(&occlusion, 0).unwrap();
        device.context().drain_messages();

        assert!(matches!(
            command_buffer.end(),
            Err(Validated::Error(BackendError::DeviceLost)),
        ));
        assert!(command_buffer.is_recording());
        assert_eq!(device.context().warning_count(), 0);

        // The backend fails only once.
        command_buffer.end().unwrap();
        assert!(!command_buffer.is_recording());

        let messages = device.context().drain_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0]
            .description
            .starts_with("recording ended while the query at offset 0 of query pool #"));
    }

    #[test]
    fn query_pool_from_other_device() {
        let (device, calls) = mock_device!(strict);
        let (other_device, _) = mock_device!();
        let foreign = query_pool(&other_device, QueryType::Occlusion);
        let mut command_buffer =
            CommandBufferVal::from_handle(&device, Box::new(MockCommandBuffer::new(&calls)));

        command_buffer.begin().unwrap();
        let err = command_buffer.begin_query(&foreign, 0).unwrap_err();
        assert_eq!(err.context, "begin_query");
        assert_eq!(foreign.is_active(0), Some(false));
    }

    #[test]
    fn drop_while_recording() {
        let (device, calls) = mock_device!();
        let mut command_buffer =
            CommandBufferVal::from_handle(&device, Box::new(MockCommandBuffer::new(&calls)));
        command_buffer.set_debug_name("main");

        command_buffer.begin().unwrap();
        drop(command_buffer);

        let messages = device.context().drain_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].object_name.as_deref(), Some("main"));
        assert_eq!(messages[0].description, "destroyed while recording");
    }
}
