//! Validation layer sitting in front of the backends of a multi-backend GPU abstraction.
//!
//! # Brief summary
//!
//! - A backend (D3D11, D3D12, Vulkan, ...) implements the traits of the [`backend`] module. Its
//!   objects do no validation of their own: handing them invalid input is a logic error whose
//!   result is up to the driver.
//!
//! - The [`DeviceVal`](crate::device::DeviceVal) wraps a backend device together with a shared
//!   [`ValidationContext`](crate::debug::ValidationContext). Every object created through it is
//!   wrapped in a validated counterpart that borrows the device, so the device and its context
//!   always outlive the objects that report through them.
//!
//! - [`QueryPoolVal`](crate::query::QueryPoolVal) tracks the logical state of every query slot
//!   and rejects double begins, unmatched ends and out-of-range resets before they reach the
//!   backend.
//!
//! - [`CommandBufferVal`](crate::command_buffer::CommandBufferVal) is the recording path that
//!   issues the query commands. It decides, based on the strict mode of the context, whether a
//!   rejected command is absorbed or returned to the caller as an error.
//!
//! - The [`interop`] module holds the descriptors used to wrap native objects that already
//!   exist, instead of creating new ones.
//!
//! # Error handling
//!
//! Functions that check their input return a [`Box<ValidationError>`], or a [`Validated<E>`]
//! when the backend can fail too. Every validation error raised by a validated object is also
//! reported through the validation context before it is returned, so a caller that ignores the
//! returned value still gets the diagnostic.

use std::{
    borrow::Cow,
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

#[macro_use]
mod tests;
mod macros;

pub mod backend;
pub mod command_buffer;
pub mod debug;
pub mod device;
pub mod interop;
pub mod query;
pub mod resource;

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate. Structures with a field of this type can
/// only be constructed by calling a constructor function or `Default::default()`. The effect is
/// similar to the standard Rust `#[non_exhaustive]` attribute, except that it does not prevent
/// update syntax from being used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)] // add traits as needed
pub struct NonExhaustive(pub(crate) ());

/// A wrapper for error types of functions that can return validation errors.
#[derive(Clone)]
pub enum Validated<E> {
    /// A non-validation error occurred.
    Error(E),

    /// A validation error occurred.
    ValidationError(Box<ValidationError>),
}

impl<E> Validated<E> {
    /// Maps the inner `Error` value using the provided function, or does nothing if the value is
    /// `ValidationError`.
    #[inline]
    pub fn map<F>(self, f: impl FnOnce(E) -> F) -> Validated<F> {
        match self {
            Self::Error(err) => Validated::Error(f(err)),
            Self::ValidationError(err) => Validated::ValidationError(err),
        }
    }

    /// Returns the inner `Error` value, or panics if it contains `ValidationError`.
    #[inline(always)]
    #[track_caller]
    pub fn unwrap(self) -> E {
        match self {
            Self::Error(err) => err,
            Self::ValidationError(err) => {
                panic!(
                    "called `Validated::unwrap` on a `ValidationError` value: {:?}",
                    err
                )
            }
        }
    }
}

impl<E> Error for Validated<E>
where
    E: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Error(err) => Some(err),
            Self::ValidationError(err) => Some(err),
        }
    }
}

impl<E> Display for Validated<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Error(_) => write!(f, "a non-validation error occurred"),
            Self::ValidationError(_) => write!(f, "a validation error occurred"),
        }
    }
}

impl<E> std::fmt::Debug for Validated<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Error(err) => write!(f, "a non-validation error occurred: {}", err),
            Self::ValidationError(err) => {
                write!(f, "a validation error occurred\n\nCaused by:\n    {:?}", err)
            }
        }
    }
}

impl<E> From<Box<ValidationError>> for Validated<E> {
    #[inline]
    fn from(err: Box<ValidationError>) -> Self {
        Self::ValidationError(err)
    }
}

impl From<BackendError> for Validated<BackendError> {
    #[inline]
    fn from(err: BackendError) -> Self {
        Self::Error(err)
    }
}

/// The arguments or other context of a call to a validated function did not meet its
/// requirements.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ValidationError {
    /// The context in which the problem exists (e.g. a specific parameter).
    pub context: Cow<'static, str>,

    /// A description of the problem.
    pub problem: Cow<'static, str>,
}

impl ValidationError {
    pub(crate) fn add_context(
        mut self: Box<Self>,
        context: impl Into<Cow<'static, str>>,
    ) -> Box<Self> {
        if self.context.is_empty() {
            self.context = context.into();
        } else {
            self.context = format!("{}.{}", context.into(), self.context).into();
        }

        self
    }
}

impl std::fmt::Debug for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if self.context.is_empty() {
            write!(f, "{}", self.problem)
        } else {
            write!(f, "{}: {}", self.context, self.problem)
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        std::fmt::Debug::fmt(self, f)
    }
}

impl Error for ValidationError {}

/// Error type returned by the functions of a backend.
///
/// The validation layer never produces these itself, with the exception of
/// [`OutOfHostMemory`](BackendError::OutOfHostMemory) when its own bookkeeping cannot be
/// allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BackendError {
    /// A host memory allocation has failed.
    OutOfHostMemory,

    /// A device memory allocation has failed.
    OutOfDeviceMemory,

    /// The device has been lost.
    DeviceLost,

    /// The backend does not support the requested operation.
    Unsupported,

    /// An error that the backend could not classify.
    Unknown,
}

impl Error for BackendError {}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        let msg = match self {
            BackendError::OutOfHostMemory => "A host memory allocation has failed.",
            BackendError::OutOfDeviceMemory => "A device memory allocation has failed.",
            BackendError::DeviceLost => "The logical or physical device has been lost.",
            BackendError::Unsupported => "The requested operation is not supported by the backend.",
            BackendError::Unknown => {
                "An unknown error has occurred; either the application has provided invalid \
                input, or an implementation failure has occurred."
            }
        };

        write!(f, "{msg}")
    }
}
