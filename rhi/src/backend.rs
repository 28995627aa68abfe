//! The objects of a backend, as seen by the validation layer.
//!
//! A backend is the non-validating implementation of the abstraction for one native API. The
//! validation layer treats its objects as opaque: it only calls the functions below, and only
//! after its own checks have passed. Destroying a backend object is done by dropping it.
//!
//! Every trait requires `Send + Sync`, because validated objects may be used from several
//! recording threads at once.

use crate::{interop::d3d11::WrapperD3D11, query::QueryType, BackendError};
use std::fmt::Debug;

/// A device of a backend. Creates the other backend objects.
pub trait DeviceBackend: Debug + Send + Sync {
    /// Creates a query pool holding `query_count` queries of type `query_type`.
    ///
    /// `query_count` is never 0.
    fn create_query_pool(
        &self,
        query_type: QueryType,
        query_count: u32,
    ) -> Result<Box<dyn QueryPoolBackend>, BackendError>;

    /// Returns whether the backend can create query pools of type `query_type`.
    ///
    /// The default implementation returns `true`.
    #[inline]
    fn supports_query_type(&self, query_type: QueryType) -> bool {
        let _ = query_type;
        true
    }

    /// Returns the D3D11 interop functions of this device, if the backend is a D3D11 backend.
    ///
    /// The default implementation returns `None`.
    #[inline]
    fn d3d11(&self) -> Option<&dyn WrapperD3D11> {
        None
    }
}

/// A query pool of a backend.
pub trait QueryPoolBackend: Debug + Send + Sync {
    /// Starts the query at `offset`.
    fn begin_query(&self, offset: u32);

    /// Ends the query at `offset`. For timestamp queries, this writes the timestamp.
    fn end_query(&self, offset: u32);

    /// Resets the queries in `offset..offset + number`.
    fn reset_queries(&self, offset: u32, number: u32);

    /// Returns the size in bytes of the result of one query.
    fn query_size(&self) -> u32;

    /// Assigns a name to the native object, for debugging tools.
    fn set_debug_name(&self, name: &str);
}

/// A command buffer of a backend.
pub trait CommandBufferBackend: Debug + Send + Sync {
    /// Starts recording.
    fn begin(&self) -> Result<(), BackendError>;

    /// Ends recording.
    fn end(&self) -> Result<(), BackendError>;

    /// Assigns a name to the native object, for debugging tools.
    fn set_debug_name(&self, name: &str);
}

/// A buffer of a backend.
pub trait BufferBackend: Debug + Send + Sync {
    /// Assigns a name to the native object, for debugging tools.
    fn set_debug_name(&self, name: &str);
}

/// A texture of a backend.
pub trait TextureBackend: Debug + Send + Sync {
    /// Assigns a name to the native object, for debugging tools.
    fn set_debug_name(&self, name: &str);
}
