//! Interop with native Direct3D 11 objects.
//!
//! - [`DeviceVal::from_d3d11_device`] wraps an existing `ID3D11Device`.
//! - [`CommandBufferVal::from_d3d11`] wraps an immediate or deferred `ID3D11DeviceContext`.
//! - [`BufferVal::from_d3d11`] and [`TextureVal::from_d3d11`] wrap an `ID3D11Resource`.
//!
//! [`CommandBufferVal::from_d3d11`]: crate::command_buffer::CommandBufferVal::from_d3d11
//! [`BufferVal::from_d3d11`]: crate::resource::BufferVal::from_d3d11
//! [`TextureVal::from_d3d11`]: crate::resource::TextureVal::from_d3d11

use super::NativeHandle;
use crate::{
    backend::{BufferBackend, CommandBufferBackend, DeviceBackend, TextureBackend},
    debug::{UserCallback, ValidationContextCreateInfo},
    device::DeviceVal,
    BackendError, Validated, ValidationError,
};
use std::{ffi::c_void, fmt};

/// The D3D11-specific functions of a backend device.
pub trait WrapperD3D11: Send + Sync {
    /// Wraps an `ID3D11DeviceContext`.
    fn create_command_buffer_d3d11(
        &self,
        desc: &CommandBufferD3D11Desc,
    ) -> Result<Box<dyn CommandBufferBackend>, BackendError>;

    /// Wraps an `ID3D11Resource` that is a buffer.
    fn create_buffer_d3d11(
        &self,
        desc: &BufferD3D11Desc,
    ) -> Result<Box<dyn BufferBackend>, BackendError>;

    /// Wraps an `ID3D11Resource` that is a texture.
    fn create_texture_d3d11(
        &self,
        desc: &TextureD3D11Desc,
    ) -> Result<Box<dyn TextureBackend>, BackendError>;
}

impl DeviceVal {
    /// Wraps an existing `ID3D11Device` with validation.
    ///
    /// `create_backend` creates the backend device from `desc`. The message callback of
    /// `desc.callback_interface`, if any, takes precedence over the one in `create_info`.
    ///
    /// `desc.enable_validation` must be `true`: a device created without validation should not
    /// be wrapped by this layer at all.
    pub fn from_d3d11_device(
        desc: DeviceCreationD3D11Desc,
        create_info: ValidationContextCreateInfo,
        create_backend: impl FnOnce(
            &DeviceCreationD3D11Desc,
        ) -> Result<Box<dyn DeviceBackend>, BackendError>,
    ) -> Result<DeviceVal, Validated<BackendError>> {
        Self::validate_from_d3d11_device(&desc)?;

        let handle = create_backend(&desc)?;

        if handle.d3d11().is_none() {
            return Err(Box::new(ValidationError {
                context: "create_backend".into(),
                problem: "returned a device that is not a D3D11 device".into(),
            })
            .into());
        }

        let DeviceCreationD3D11Desc {
            callback_interface, ..
        } = desc;

        let create_info = match callback_interface.message_callback {
            Some(user_callback) => ValidationContextCreateInfo {
                user_callback: Some(user_callback),
                ..create_info
            },
            None => create_info,
        };

        Ok(DeviceVal::new(handle, create_info))
    }

    fn validate_from_d3d11_device(
        desc: &DeviceCreationD3D11Desc,
    ) -> Result<(), Box<ValidationError>> {
        if !desc.enable_validation {
            return Err(Box::new(ValidationError {
                context: "desc.enable_validation".into(),
                problem: "is `false`".into(),
            }));
        }

        let MemoryAllocatorInterface {
            allocate,
            reallocate,
            free,
            user_data: _,
        } = desc.memory_allocator_interface;

        if allocate.is_some() != reallocate.is_some() || allocate.is_some() != free.is_some() {
            return Err(Box::new(ValidationError {
                context: "desc.memory_allocator_interface".into(),
                problem: "provides some of `allocate`, `reallocate` and `free`, but not all"
                    .into(),
            }));
        }

        Ok(())
    }

    /// Returns the D3D11 functions of the backend, or reports an error if the backend is not a
    /// D3D11 backend.
    pub(crate) fn d3d11(&self) -> Result<&dyn WrapperD3D11, Box<ValidationError>> {
        self.handle().d3d11().ok_or_else(|| {
            self.report_error(
                self.object_info(),
                Box::new(ValidationError {
                    problem: "the backend of the device does not support D3D11 interop".into(),
                    ..Default::default()
                }),
            )
        })
    }
}

/// Parameters to wrap an existing `ID3D11Device`.
#[derive(Clone, Debug)]
pub struct DeviceCreationD3D11Desc {
    /// The `ID3D11Device` to wrap.
    ///
    /// There is no default value.
    pub d3d11_device: NativeHandle,

    /// The AMD GPU Services context associated with the device, if any.
    ///
    /// The default value is `None`.
    pub ags_context: Option<NativeHandle>,

    /// Where the messages of the layer should be sent.
    ///
    /// The default value is empty.
    pub callback_interface: CallbackInterface,

    /// How the backend should allocate host memory.
    ///
    /// The default value is empty, meaning the backend uses its own allocator.
    pub memory_allocator_interface: MemoryAllocatorInterface,

    /// Whether this validation layer is requested.
    ///
    /// The default value is `true`.
    pub enable_validation: bool,

    /// Whether the backend should enable the validation of the native API.
    ///
    /// The default value is `false`.
    pub enable_api_validation: bool,

    pub _ne: crate::NonExhaustive,
}

impl DeviceCreationD3D11Desc {
    /// Returns a `DeviceCreationD3D11Desc` with the specified `d3d11_device`.
    #[inline]
    pub fn d3d11_device(d3d11_device: NativeHandle) -> Self {
        Self {
            d3d11_device,
            ags_context: None,
            callback_interface: CallbackInterface::default(),
            memory_allocator_interface: MemoryAllocatorInterface::default(),
            enable_validation: true,
            enable_api_validation: false,
            _ne: crate::NonExhaustive(()),
        }
    }
}

/// Parameters to wrap an existing `ID3D11DeviceContext`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandBufferD3D11Desc {
    /// The immediate or deferred context to wrap.
    pub d3d11_device_context: NativeHandle,
}

/// Parameters to wrap an existing `ID3D11Resource` as a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferD3D11Desc {
    /// The `ID3D11Buffer` to wrap.
    pub d3d11_resource: NativeHandle,
}

/// Parameters to wrap an existing `ID3D11Resource` as a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureD3D11Desc {
    /// The `ID3D11Texture1D`, `ID3D11Texture2D` or `ID3D11Texture3D` to wrap.
    pub d3d11_resource: NativeHandle,
}

/// The callbacks that receive the messages of the layer.
#[derive(Clone, Default)]
pub struct CallbackInterface {
    /// Receives every message of the layer. Overrides the callback of the context.
    pub message_callback: Option<UserCallback>,
}

impl fmt::Debug for CallbackInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackInterface")
            .field("message_callback", &self.message_callback.is_some())
            .finish()
    }
}

/// Allocates `size` bytes aligned to `alignment`.
pub type AllocateFn =
    unsafe extern "system" fn(user_data: *mut c_void, size: usize, alignment: usize) -> *mut c_void;
/// Resizes an allocation made by the matching [`AllocateFn`].
pub type ReallocateFn = unsafe extern "system" fn(
    user_data: *mut c_void,
    memory: *mut c_void,
    size: usize,
    alignment: usize,
) -> *mut c_void;
/// Frees an allocation made by the matching [`AllocateFn`] or [`ReallocateFn`].
pub type FreeFn = unsafe extern "system" fn(user_data: *mut c_void, memory: *mut c_void);

/// Host memory allocation hooks for the backend.
///
/// Either all three functions are provided, or none of them.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryAllocatorInterface {
    /// The allocation function.
    pub allocate: Option<AllocateFn>,
    /// The reallocation function.
    pub reallocate: Option<ReallocateFn>,
    /// The deallocation function.
    pub free: Option<FreeFn>,
    /// Passed as the first argument of every hook.
    pub user_data: Option<NativeHandle>,
}
