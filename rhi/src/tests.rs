#![cfg(test)]

use crate::{
    backend::{BufferBackend, CommandBufferBackend, DeviceBackend, QueryPoolBackend, TextureBackend},
    interop::d3d11::{BufferD3D11Desc, CommandBufferD3D11Desc, TextureD3D11Desc, WrapperD3D11},
    query::QueryType,
    BackendError,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Creates a `DeviceVal` on top of a `MockDevice`, and returns it with the log of the calls that
/// reach the backend.
///
/// Every message is recorded, whatever its severity. `mock_device!(strict)` creates a device
/// whose context is strict.
macro_rules! mock_device {
    () => {
        mock_device!(@create false)
    };
    (strict) => {
        mock_device!(@create true)
    };
    (@create $strict:expr) => {{
        let calls = $crate::tests::CallLog::default();
        let device = $crate::device::DeviceVal::new(
            Box::new($crate::tests::MockDevice::new(&calls)),
            $crate::debug::ValidationContextCreateInfo {
                message_severity: $crate::debug::MessageSeverity::all(),
                strict: $strict,
                record_messages: true,
                ..Default::default()
            },
        );

        (device, calls)
    }};
}

macro_rules! assert_should_panic {
    ($msg:expr, $code:block) => {{
        let res = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| $code));

        match res {
            Ok(_) => panic!("Test expected to panic but didn't"),
            Err(err) => {
                if let Some(msg) = err.downcast_ref::<String>() {
                    assert!(msg.contains($msg));
                } else if let Some(&msg) = err.downcast_ref::<&str>() {
                    assert!(msg.contains($msg));
                } else {
                    panic!("Couldn't decipher the panic message of the test")
                }
            }
        }
    }};

    ($code:block) => {{
        let res = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| $code));

        match res {
            Ok(_) => panic!("Test expected to panic but didn't"),
            Err(_) => {}
        }
    }};
}

/// A call that reached a mock backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    CreateQueryPool {
        query_type: QueryType,
        query_count: u32,
    },
    BeginQuery(u32),
    EndQuery(u32),
    ResetQueries(u32, u32),
    SetDebugName(String),
    CommandBufferBegin,
    CommandBufferEnd,
    CreateCommandBufferD3D11,
    CreateBufferD3D11,
    CreateTextureD3D11,
}

/// The calls made to every mock object created from the same `MockDevice`, in order.
#[derive(Clone, Debug, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    /// Returns the calls logged so far, and clears the log.
    pub(crate) fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.0.lock())
    }
}

#[derive(Debug)]
pub(crate) struct MockDevice {
    pub(crate) calls: CallLog,
    pub(crate) d3d11: bool,
    pub(crate) unsupported_query_types: Vec<QueryType>,
    pub(crate) creation_error: Option<BackendError>,
}

impl MockDevice {
    pub(crate) fn new(calls: &CallLog) -> Self {
        MockDevice {
            calls: calls.clone(),
            d3d11: true,
            unsupported_query_types: Vec::new(),
            creation_error: None,
        }
    }
}

impl DeviceBackend for MockDevice {
    fn create_query_pool(
        &self,
        query_type: QueryType,
        query_count: u32,
    ) -> Result<Box<dyn QueryPoolBackend>, BackendError> {
        if let Some(err) = self.creation_error {
            return Err(err);
        }

        self.calls.push(Call::CreateQueryPool {
            query_type,
            query_count,
        });

        Ok(Box::new(MockQueryPool::new(&self.calls)))
    }

    fn supports_query_type(&self, query_type: QueryType) -> bool {
        !self.unsupported_query_types.contains(&query_type)
    }

    fn d3d11(&self) -> Option<&dyn WrapperD3D11> {
        self.d3d11.then_some(self as &dyn WrapperD3D11)
    }
}

impl WrapperD3D11 for MockDevice {
    fn create_command_buffer_d3d11(
        &self,
        _desc: &CommandBufferD3D11Desc,
    ) -> Result<Box<dyn CommandBufferBackend>, BackendError> {
        self.calls.push(Call::CreateCommandBufferD3D11);

        Ok(Box::new(MockCommandBuffer::new(&self.calls)))
    }

    fn create_buffer_d3d11(
        &self,
        _desc: &BufferD3D11Desc,
    ) -> Result<Box<dyn BufferBackend>, BackendError> {
        self.calls.push(Call::CreateBufferD3D11);

        Ok(Box::new(MockResource::new(&self.calls)))
    }

    fn create_texture_d3d11(
        &self,
        _desc: &TextureD3D11Desc,
    ) -> Result<Box<dyn TextureBackend>, BackendError> {
        self.calls.push(Call::CreateTextureD3D11);

        Ok(Box::new(MockResource::new(&self.calls)))
    }
}

#[derive(Debug)]
pub(crate) struct MockQueryPool {
    calls: CallLog,
}

impl MockQueryPool {
    pub(crate) fn new(calls: &CallLog) -> Self {
        MockQueryPool {
            calls: calls.clone(),
        }
    }
}

impl QueryPoolBackend for MockQueryPool {
    fn begin_query(&self, offset: u32) {
        self.calls.push(Call::BeginQuery(offset));
    }

    fn end_query(&self, offset: u32) {
        self.calls.push(Call::EndQuery(offset));
    }

    fn reset_queries(&self, offset: u32, number: u32) {
        self.calls.push(Call::ResetQueries(offset, number));
    }

    fn query_size(&self) -> u32 {
        8
    }

    fn set_debug_name(&self, name: &str) {
        self.calls.push(Call::SetDebugName(name.to_owned()));
    }
}

#[derive(Debug)]
pub(crate) struct MockCommandBuffer {
    pub(crate) calls: CallLog,
    pub(crate) end_error: Mutex<Option<BackendError>>,
}

impl MockCommandBuffer {
    pub(crate) fn new(calls: &CallLog) -> Self {
        MockCommandBuffer {
            calls: calls.clone(),
            end_error: Mutex::new(None),
        }
    }
}

impl CommandBufferBackend for MockCommandBuffer {
    fn begin(&self) -> Result<(), BackendError> {
        self.calls.push(Call::CommandBufferBegin);

        Ok(())
    }

    fn end(&self) -> Result<(), BackendError> {
        if let Some(err) = self.end_error.lock().take() {
            return Err(err);
        }

        self.calls.push(Call::CommandBufferEnd);

        Ok(())
    }

    fn set_debug_name(&self, name: &str) {
        self.calls.push(Call::SetDebugName(name.to_owned()));
    }
}

/// Stands in for both buffers and textures.
#[derive(Debug)]
pub(crate) struct MockResource {
    calls: CallLog,
}

impl MockResource {
    pub(crate) fn new(calls: &CallLog) -> Self {
        MockResource {
            calls: calls.clone(),
        }
    }
}

impl BufferBackend for MockResource {
    fn set_debug_name(&self, name: &str) {
        self.calls.push(Call::SetDebugName(name.to_owned()));
    }
}

impl TextureBackend for MockResource {
    fn set_debug_name(&self, name: &str) {
        self.calls.push(Call::SetDebugName(name.to_owned()));
    }
}
