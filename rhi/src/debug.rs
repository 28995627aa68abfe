//! The validation context shared by a device and all the objects created from it.
//!
//! Validated objects never abort on misuse. Instead they report a message through the context of
//! their device, reject the call, and carry on. Where the message ends up depends on how the
//! context was created:
//!
//! - If a user callback was provided, it is called with every message whose severity is enabled.
//! - Otherwise the message is emitted as a `tracing` event at the matching level.
//!
//! The context can also keep a copy of every message, which is mostly useful in tests.
//!
//! # Example
//!
//! ```
//! use rhi::debug::{Message, MessageSeverity, ValidationContext, ValidationContextCreateInfo};
//! use std::sync::Arc;
//!
//! let context = ValidationContext::new(ValidationContextCreateInfo {
//!     message_severity: MessageSeverity::all(),
//!     ..ValidationContextCreateInfo::user_callback(Arc::new(|msg: &Message<'_>| {
//!         println!("Validation: {}", msg);
//!     }))
//! });
//!
//! context.report(MessageSeverity::warnings(), None, "something looks off");
//! assert_eq!(context.warning_count(), 1);
//! ```
//!
//! # Strict mode
//!
//! A context created with `strict` set is a request to the callers of validated objects to treat
//! every reported error as a hard failure. The objects themselves behave the same way in both
//! modes; it is up to the recording code (for example
//! [`CommandBufferVal`](crate::command_buffer::CommandBufferVal)) to escalate.

use crossbeam_queue::SegQueue;
use foldhash::HashMap;
use parking_lot::RwLock;
use std::{
    fmt,
    num::NonZero,
    panic::{catch_unwind, AssertUnwindSafe, RefUnwindSafe},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

/// The closure that receives the messages of a context.
pub type UserCallback = Arc<dyn Fn(&Message<'_>) + RefUnwindSafe + Send + Sync>;

/// Receives and dispatches the diagnostics of a device and its objects.
pub struct ValidationContext {
    message_severity: MessageSeverity,
    strict: bool,
    user_callback: Option<UserCallback>,
    recorded_messages: Option<SegQueue<RecordedMessage>>,

    error_count: AtomicU32,
    warning_count: AtomicU32,

    object_names: RwLock<HashMap<NonZero<u64>, String>>,
}

impl ValidationContext {
    /// Creates a new `ValidationContext`.
    pub fn new(create_info: ValidationContextCreateInfo) -> Self {
        let ValidationContextCreateInfo {
            message_severity,
            strict,
            user_callback,
            record_messages,
            _ne: _,
        } = create_info;

        ValidationContext {
            message_severity,
            strict,
            user_callback,
            recorded_messages: record_messages.then(SegQueue::new),
            error_count: AtomicU32::new(0),
            warning_count: AtomicU32::new(0),
            object_names: RwLock::new(HashMap::default()),
        }
    }

    /// Returns whether reported errors should be treated as hard failures by the callers.
    #[inline]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Returns the severities of the messages that are dispatched.
    #[inline]
    pub fn message_severity(&self) -> MessageSeverity {
        self.message_severity
    }

    /// Reports a message, optionally on behalf of an object.
    ///
    /// Errors and warnings are counted even if their severity is not enabled, but only enabled
    /// messages reach the callback, the `tracing` subscriber and the recorded messages.
    pub fn report(&self, severity: MessageSeverity, object: Option<ObjectInfo>, description: &str) {
        if severity.error {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }

        if severity.warning {
            self.warning_count.fetch_add(1, Ordering::Relaxed);
        }

        if !self.message_severity.intersects(severity) {
            return;
        }

        // Copied out so that the lock isn't held while the callback runs.
        let object_name = object.and_then(|object| self.object_name(object.id));
        let message = Message {
            severity,
            object_type: object.map(|object| object.object_type),
            object_name: object_name.as_deref(),
            description,
        };

        match &self.user_callback {
            Some(user_callback) => {
                // Panics in the callback are swallowed.
                let _ = catch_unwind(AssertUnwindSafe(|| user_callback(&message)));
            }
            None => emit_tracing_event(&message),
        }

        if let Some(recorded_messages) = &self.recorded_messages {
            recorded_messages.push(RecordedMessage::from(&message));
        }
    }

    /// Returns the number of errors reported so far.
    #[inline]
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Returns the number of warnings reported so far.
    #[inline]
    pub fn warning_count(&self) -> u32 {
        self.warning_count.load(Ordering::Relaxed)
    }

    /// Takes all the messages recorded so far, oldest first.
    ///
    /// Returns an empty `Vec` if the context was not created with `record_messages`.
    pub fn drain_messages(&self) -> Vec<RecordedMessage> {
        match &self.recorded_messages {
            Some(recorded_messages) => std::iter::from_fn(|| recorded_messages.pop()).collect(),
            None => Vec::new(),
        }
    }

    /// Assigns a debug name to the object with the given id, replacing any previous name.
    pub fn set_object_name(&self, id: NonZero<u64>, name: &str) {
        self.object_names.write().insert(id, name.to_owned());
    }

    /// Returns the debug name of the object with the given id.
    pub fn object_name(&self, id: NonZero<u64>) -> Option<String> {
        self.object_names.read().get(&id).cloned()
    }

    pub(crate) fn forget_object(&self, id: NonZero<u64>) {
        self.object_names.write().remove(&id);
    }
}

impl fmt::Debug for ValidationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            message_severity,
            strict,
            user_callback: _,
            recorded_messages,
            error_count,
            warning_count,
            object_names: _,
        } = self;

        f.debug_struct("ValidationContext")
            .field("message_severity", message_severity)
            .field("strict", strict)
            .field("record_messages", &recorded_messages.is_some())
            .field("error_count", error_count)
            .field("warning_count", warning_count)
            .finish_non_exhaustive()
    }
}

fn emit_tracing_event(message: &Message<'_>) {
    if message.severity.error {
        tracing::error!("{}", message);
    } else if message.severity.warning {
        tracing::warn!("{}", message);
    } else if message.severity.information {
        tracing::info!("{}", message);
    } else {
        tracing::debug!("{}", message);
    }
}

/// Parameters to create a `ValidationContext`.
#[derive(Clone)]
pub struct ValidationContextCreateInfo {
    /// The message severities that should be dispatched.
    ///
    /// The default value is `MessageSeverity::errors_and_warnings()`.
    pub message_severity: MessageSeverity,

    /// Whether the callers should treat reported errors as hard failures.
    ///
    /// The default value is `false`.
    pub strict: bool,

    /// The closure that receives the messages. If `None`, messages are emitted as `tracing`
    /// events instead.
    ///
    /// The closure must not call back into the validation layer. If it panics, the panic is
    /// caught and ignored.
    ///
    /// The default value is `None`.
    pub user_callback: Option<UserCallback>,

    /// Whether the context should keep a copy of every dispatched message, to be retrieved with
    /// [`ValidationContext::drain_messages`].
    ///
    /// The default value is `false`.
    pub record_messages: bool,

    pub _ne: crate::NonExhaustive,
}

impl ValidationContextCreateInfo {
    /// Returns a `ValidationContextCreateInfo` with the specified `user_callback`.
    #[inline]
    pub fn user_callback(user_callback: UserCallback) -> Self {
        Self {
            user_callback: Some(user_callback),
            ..Default::default()
        }
    }
}

impl Default for ValidationContextCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            message_severity: MessageSeverity::errors_and_warnings(),
            strict: false,
            user_callback: None,
            record_messages: false,
            _ne: crate::NonExhaustive(()),
        }
    }
}

impl fmt::Debug for ValidationContextCreateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            message_severity,
            strict,
            user_callback,
            record_messages,
            _ne: _,
        } = self;

        f.debug_struct("ValidationContextCreateInfo")
            .field("message_severity", message_severity)
            .field("strict", strict)
            .field("user_callback", &user_callback.is_some())
            .field("record_messages", record_messages)
            .finish_non_exhaustive()
    }
}

/// The kind of a validated object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ObjectType {
    Device,
    QueryPool,
    CommandBuffer,
    Buffer,
    Texture,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectType::Device => "Device",
            ObjectType::QueryPool => "QueryPool",
            ObjectType::CommandBuffer => "CommandBuffer",
            ObjectType::Buffer => "Buffer",
            ObjectType::Texture => "Texture",
        };

        f.write_str(name)
    }
}

/// Identifies the object a message is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectInfo {
    pub object_type: ObjectType,
    pub id: NonZero<u64>,
}

/// A message received by the callback.
#[derive(Clone, Copy, Debug)]
pub struct Message<'a> {
    /// Severity of the message. Exactly one flag is set.
    pub severity: MessageSeverity,
    /// Type of the object that reported the message, if any.
    pub object_type: Option<ObjectType>,
    /// Debug name of the object that reported the message, if it has one.
    pub object_name: Option<&'a str>,
    /// Description of the message.
    pub description: &'a str,
}

impl fmt::Display for Message<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.object_type, self.object_name) {
            (Some(object_type), Some(object_name)) => {
                write!(f, "{} \"{}\": {}", object_type, object_name, self.description)
            }
            (Some(object_type), None) => write!(f, "{}: {}", object_type, self.description),
            (None, _) => f.write_str(self.description),
        }
    }
}

/// An owned copy of a [`Message`], kept by a context created with `record_messages`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedMessage {
    pub severity: MessageSeverity,
    pub object_type: Option<ObjectType>,
    pub object_name: Option<String>,
    pub description: String,
}

impl From<&Message<'_>> for RecordedMessage {
    fn from(message: &Message<'_>) -> Self {
        RecordedMessage {
            severity: message.severity,
            object_type: message.object_type,
            object_name: message.object_name.map(ToOwned::to_owned),
            description: message.description.to_owned(),
        }
    }
}

/// Severity of message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MessageSeverity {
    /// A misuse of the API. The offending call was rejected.
    pub error: bool,
    /// A suspicious use that was nevertheless carried out.
    pub warning: bool,
    /// An informational message that may be handy when debugging an application.
    pub information: bool,
    /// Diagnostic information about the inner workings of the validation layer.
    pub verbose: bool,
}

impl MessageSeverity {
    /// Builds a `MessageSeverity` with all fields set to `false` except `error`.
    #[inline]
    pub const fn errors() -> MessageSeverity {
        MessageSeverity {
            error: true,
            ..MessageSeverity::none()
        }
    }

    /// Builds a `MessageSeverity` with all fields set to `false` except `warning`.
    #[inline]
    pub const fn warnings() -> MessageSeverity {
        MessageSeverity {
            warning: true,
            ..MessageSeverity::none()
        }
    }

    /// Builds a `MessageSeverity` with all fields set to `false` except `information`.
    #[inline]
    pub const fn information() -> MessageSeverity {
        MessageSeverity {
            information: true,
            ..MessageSeverity::none()
        }
    }

    /// Builds a `MessageSeverity` with all fields set to `false` except `verbose`.
    #[inline]
    pub const fn verbose() -> MessageSeverity {
        MessageSeverity {
            verbose: true,
            ..MessageSeverity::none()
        }
    }

    /// Builds a `MessageSeverity` with all fields set to `false` except `error` and `warning`.
    #[inline]
    pub const fn errors_and_warnings() -> MessageSeverity {
        MessageSeverity {
            error: true,
            warning: true,
            ..MessageSeverity::none()
        }
    }

    /// Builds a `MessageSeverity` with all fields set to `false`.
    #[inline]
    pub const fn none() -> MessageSeverity {
        MessageSeverity {
            error: false,
            warning: false,
            information: false,
            verbose: false,
        }
    }

    /// Builds a `MessageSeverity` with all fields set to `true`.
    #[inline]
    pub const fn all() -> MessageSeverity {
        MessageSeverity {
            error: true,
            warning: true,
            information: true,
            verbose: true,
        }
    }

    /// Returns whether any field is set in both `self` and `other`.
    #[inline]
    pub const fn intersects(self, other: MessageSeverity) -> bool {
        (self.error && other.error)
            || (self.warning && other.warning)
            || (self.information && other.information)
            || (self.verbose && other.verbose)
    }
}

impl std::ops::BitOr for MessageSeverity {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        MessageSeverity {
            error: self.error | rhs.error,
            warning: self.warning | rhs.warning,
            information: self.information | rhs.information,
            verbose: self.verbose | rhs.verbose,
        }
    }
}
