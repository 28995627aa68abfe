//! Buffers and textures.
//!
//! The layer does not validate anything about resources yet. Their wrappers give them the same
//! shape as the other validated objects, so that they can be named and identified in messages.

use crate::{
    backend::{BufferBackend, TextureBackend},
    debug::{ObjectInfo, ObjectType},
    device::{DeviceObject, DeviceVal},
    interop::d3d11::{BufferD3D11Desc, TextureD3D11Desc},
    macros::impl_id_counter,
    BackendError, Validated,
};
use std::{fmt, num::NonZero};

/// A backend buffer, wrapped with validation.
pub struct BufferVal<'d> {
    device: &'d DeviceVal,
    handle: Box<dyn BufferBackend>,
    id: NonZero<u64>,
    imported: bool,
}

impl<'d> BufferVal<'d> {
    /// Wraps a backend buffer that was created through this layer.
    pub fn from_handle(device: &'d DeviceVal, handle: Box<dyn BufferBackend>) -> BufferVal<'d> {
        Self::wrap(device, handle, false)
    }

    /// Wraps an existing `ID3D11Resource`. The buffer is [imported](Self::is_imported).
    pub fn from_d3d11(
        device: &'d DeviceVal,
        desc: &BufferD3D11Desc,
    ) -> Result<BufferVal<'d>, Validated<BackendError>> {
        let handle = device.d3d11()?.create_buffer_d3d11(desc)?;

        Ok(Self::wrap(device, handle, true))
    }

    fn wrap(device: &'d DeviceVal, handle: Box<dyn BufferBackend>, imported: bool) -> Self {
        let buffer = BufferVal {
            device,
            handle,
            id: Self::next_id(),
            imported,
        };

        tracing::trace!(id = buffer.id.get(), imported, "created buffer");

        buffer
    }

    /// Returns the wrapped backend buffer.
    #[inline]
    pub fn handle(&self) -> &dyn BufferBackend {
        &*self.handle
    }

    /// Returns whether the buffer wraps a native object that was created outside of this layer.
    #[inline]
    pub fn is_imported(&self) -> bool {
        self.imported
    }
}

impl DeviceObject for BufferVal<'_> {
    #[inline]
    fn device(&self) -> &DeviceVal {
        self.device
    }

    #[inline]
    fn object_info(&self) -> ObjectInfo {
        ObjectInfo {
            object_type: ObjectType::Buffer,
            id: self.id,
        }
    }

    fn set_debug_name(&self, name: &str) {
        self.handle.set_debug_name(name);
        self.device.context().set_object_name(self.id, name);
    }
}

impl Drop for BufferVal<'_> {
    fn drop(&mut self) {
        self.device.context().forget_object(self.id);
    }
}

impl fmt::Debug for BufferVal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            device: _,
            handle,
            id,
            imported,
        } = self;

        f.debug_struct("BufferVal")
            .field("handle", handle)
            .field("id", id)
            .field("imported", imported)
            .finish_non_exhaustive()
    }
}

impl_id_counter!(BufferVal<'d>);

/// A backend texture, wrapped with validation.
pub struct TextureVal<'d> {
    device: &'d DeviceVal,
    handle: Box<dyn TextureBackend>,
    id: NonZero<u64>,
    imported: bool,
}

impl<'d> TextureVal<'d> {
    /// Wraps a backend texture that was created through this layer.
    pub fn from_handle(device: &'d DeviceVal, handle: Box<dyn TextureBackend>) -> TextureVal<'d> {
        Self::wrap(device, handle, false)
    }

    /// Wraps an existing `ID3D11Resource`. The texture is [imported](Self::is_imported).
    pub fn from_d3d11(
        device: &'d DeviceVal,
        desc: &TextureD3D11Desc,
    ) -> Result<TextureVal<'d>, Validated<BackendError>> {
        let handle = device.d3d11()?.create_texture_d3d11(desc)?;

        Ok(Self::wrap(device, handle, true))
    }

    fn wrap(device: &'d DeviceVal, handle: Box<dyn TextureBackend>, imported: bool) -> Self {
        let texture = TextureVal {
            device,
            handle,
            id: Self::next_id(),
            imported,
        };

        tracing::trace!(id = texture.id.get(), imported, "created texture");

        texture
    }

    /// Returns the wrapped backend texture.
    #[inline]
    pub fn handle(&self) -> &dyn TextureBackend {
        &*self.handle
    }

    /// Returns whether the texture wraps a native object that was created outside of this
    /// layer.
    #[inline]
    pub fn is_imported(&self) -> bool {
        self.imported
    }
}

impl DeviceObject for TextureVal<'_> {
    #[inline]
    fn device(&self) -> &DeviceVal {
        self.device
    }

    #[inline]
    fn object_info(&self) -> ObjectInfo {
        ObjectInfo {
            object_type: ObjectType::Texture,
            id: self.id,
        }
    }

    fn set_debug_name(&self, name: &str) {
        self.handle.set_debug_name(name);
        self.device.context().set_object_name(self.id, name);
    }
}

impl Drop for TextureVal<'_> {
    fn drop(&mut self) {
        self.device.context().forget_object(self.id);
    }
}

impl fmt::Debug for TextureVal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            device: _,
            handle,
            id,
            imported,
        } = self;

        f.debug_struct("TextureVal")
            .field("handle", handle)
            .field("id", id)
            .field("imported", imported)
            .finish_non_exhaustive()
    }
}

impl_id_counter!(TextureVal<'d>);
