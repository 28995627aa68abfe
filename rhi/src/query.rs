//! Gather information about rendering, held in query pools.
//!
//! Queries are not created individually. Instead you manipulate **query pools**, which represent
//! a collection of queries. Whenever you use a query, you have to specify both the query pool and
//! the slot within that query pool.
//!
//! # Query state
//!
//! Every slot of a [`QueryPoolVal`] is either *inactive* or *active*. A slot becomes active when
//! it is begun and inactive again when it is ended or reset:
//!
//! | Operation | Inactive slot        | Active slot          |
//! |-----------|----------------------|----------------------|
//! | begin     | becomes active       | rejected, reported   |
//! | end       | rejected, reported   | becomes inactive     |
//! | reset     | stays inactive       | becomes inactive     |
//!
//! A rejected operation never changes the state of any slot, and is never forwarded to the
//! backend.
//!
//! # Imported query pools
//!
//! A query pool that was created outside of this layer and then [imported] has a query count of
//! 0. Its slots are not tracked: every state change succeeds, and every call is forwarded as is.
//! Keeping an imported pool consistent is the responsibility of whoever created it.
//!
//! [imported]: QueryPoolVal::import

use crate::{
    backend::QueryPoolBackend,
    debug::{ObjectInfo, ObjectType},
    device::{DeviceObject, DeviceVal},
    macros::impl_id_counter,
    BackendError, Validated, ValidationError,
};
use std::{
    fmt,
    num::NonZero,
    sync::atomic::{AtomicU64, Ordering},
};

/// A backend query pool, wrapped with validation of the state of its queries.
pub struct QueryPoolVal<'d> {
    device: &'d DeviceVal,
    handle: Box<dyn QueryPoolBackend>,
    id: NonZero<u64>,

    query_type: QueryType,
    query_count: u32,
    // One bit per query, set while the query is active. Empty if imported.
    device_state: Box<[AtomicU64]>,
}

impl<'d> QueryPoolVal<'d> {
    /// Creates a new `QueryPoolVal` and the backend query pool that it wraps.
    pub fn new(
        device: &'d DeviceVal,
        create_info: QueryPoolCreateInfo,
    ) -> Result<QueryPoolVal<'d>, Validated<BackendError>> {
        Self::validate_new(device, &create_info)
            .map_err(|err| device.report_error(device.object_info(), err))?;

        let QueryPoolCreateInfo {
            query_type,
            query_count,
            _ne: _,
        } = create_info;

        let handle = device
            .handle()
            .create_query_pool(query_type, query_count)?;

        Ok(Self::from_handle(device, handle, query_type, query_count)?)
    }

    fn validate_new(
        device: &DeviceVal,
        create_info: &QueryPoolCreateInfo,
    ) -> Result<(), Box<ValidationError>> {
        create_info
            .validate(device)
            .map_err(|err| err.add_context("create_info"))?;

        Ok(())
    }

    /// Wraps a backend query pool that was created with `query_type` and `query_count`.
    ///
    /// All queries start out inactive. A `query_count` of 0 results in an
    /// [imported](Self::is_imported) query pool.
    ///
    /// Returns [`BackendError::OutOfHostMemory`] if the state of the queries could not be
    /// allocated.
    pub fn from_handle(
        device: &'d DeviceVal,
        handle: Box<dyn QueryPoolBackend>,
        query_type: QueryType,
        query_count: u32,
    ) -> Result<QueryPoolVal<'d>, BackendError> {
        let word_count = query_count.div_ceil(u64::BITS) as usize;
        let mut device_state = Vec::new();
        device_state
            .try_reserve_exact(word_count)
            .map_err(|_| BackendError::OutOfHostMemory)?;
        device_state.extend((0..word_count).map(|_| AtomicU64::new(0)));

        let query_pool = QueryPoolVal {
            device,
            handle,
            id: Self::next_id(),
            query_type,
            query_count,
            device_state: device_state.into_boxed_slice(),
        };

        tracing::trace!(
            id = query_pool.id.get(),
            ?query_type,
            query_count,
            "created query pool",
        );

        Ok(query_pool)
    }

    /// Wraps a backend query pool that was created outside of this layer.
    ///
    /// The state of its queries is not tracked.
    pub fn import(
        device: &'d DeviceVal,
        handle: Box<dyn QueryPoolBackend>,
        query_type: QueryType,
    ) -> QueryPoolVal<'d> {
        let query_pool = QueryPoolVal {
            device,
            handle,
            id: Self::next_id(),
            query_type,
            query_count: 0,
            device_state: Box::default(),
        };

        tracing::trace!(id = query_pool.id.get(), ?query_type, "imported query pool");

        query_pool
    }

    /// Returns the wrapped backend query pool.
    #[inline]
    pub fn handle(&self) -> &dyn QueryPoolBackend {
        &*self.handle
    }

    /// Returns the number of query slots of this query pool, or 0 if it is imported.
    #[inline]
    pub fn query_count(&self) -> u32 {
        self.query_count
    }

    /// Returns the query type of the pool.
    #[inline]
    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    /// Returns whether the pool was imported, in which case the state of its queries is not
    /// tracked.
    #[inline]
    pub fn is_imported(&self) -> bool {
        self.query_count == 0
    }

    /// Returns the size in bytes of the result of one query, as reported by the backend.
    #[inline]
    pub fn query_size(&self) -> u32 {
        self.handle.query_size()
    }

    /// Returns whether the query at `offset` is active, or `None` if `offset` is out of range or
    /// the pool is imported.
    pub fn is_active(&self, offset: u32) -> Option<bool> {
        if offset >= self.query_count {
            return None;
        }

        let (word, mask) = slot(offset);

        Some(self.device_state[word].load(Ordering::Acquire) & mask != 0)
    }

    /// Moves the query at `offset` to the active state if `state` is `true`, or to the inactive
    /// state if `state` is `false`.
    ///
    /// Returns `false`, and reports an error through the validation context, if `offset` is out
    /// of range or if the query is already in the requested state. In that case nothing changes.
    /// Always returns `true` for an imported pool.
    ///
    /// Nothing is forwarded to the backend; see [`begin_query`] and [`end_query`] for that.
    ///
    /// [`begin_query`]: Self::begin_query
    /// [`end_query`]: Self::end_query
    pub fn set_query_state(&self, offset: u32, state: bool) -> bool {
        self.transition(offset, state)
            .map_err(|err| self.report_error(err.add_context("set_query_state")))
            .is_ok()
    }

    fn transition(&self, offset: u32, state: bool) -> Result<(), Box<ValidationError>> {
        if self.is_imported() {
            return Ok(());
        }

        self.validate_offset(offset)?;

        let (word, mask) = slot(offset);
        let word = &self.device_state[word];

        // Setting a bit that is already set, or clearing one that is already clear, leaves the
        // word as it was.
        if state {
            if word.fetch_or(mask, Ordering::AcqRel) & mask != 0 {
                return Err(Box::new(ValidationError {
                    context: "offset".into(),
                    problem: format!(
                        "the query at offset {} is already active; it must be ended or reset \
                        before it can be begun again",
                        offset,
                    )
                    .into(),
                }));
            }
        } else {
            if word.fetch_and(!mask, Ordering::AcqRel) & mask == 0 {
                return Err(Box::new(ValidationError {
                    context: "offset".into(),
                    problem: format!(
                        "the query at offset {} is not active; it was never begun, or was \
                        already ended",
                        offset,
                    )
                    .into(),
                }));
            }
        }

        Ok(())
    }

    fn validate_offset(&self, offset: u32) -> Result<(), Box<ValidationError>> {
        if offset >= self.query_count {
            return Err(Box::new(ValidationError {
                context: "offset".into(),
                problem: format!(
                    "is {}, which is not less than `self.query_count()` ({})",
                    offset, self.query_count,
                )
                .into(),
            }));
        }

        Ok(())
    }

    /// Begins the query at `offset` on the backend.
    ///
    /// The query must be inactive, and the pool must not be a timestamp pool. If validation
    /// fails, the error is reported and nothing is forwarded.
    pub fn begin_query(&self, offset: u32) -> Result<(), Box<ValidationError>> {
        self.validate_not_timestamp()
            .and_then(|()| self.transition(offset, true))
            .map_err(|err| self.report_error(err.add_context("begin_query")))?;

        self.handle.begin_query(offset);

        Ok(())
    }

    /// Ends the query at `offset` on the backend.
    ///
    /// The query must be active, and the pool must not be a timestamp pool. If validation fails,
    /// the error is reported and nothing is forwarded.
    pub fn end_query(&self, offset: u32) -> Result<(), Box<ValidationError>> {
        self.validate_not_timestamp()
            .and_then(|()| self.transition(offset, false))
            .map_err(|err| self.report_error(err.add_context("end_query")))?;

        self.handle.end_query(offset);

        Ok(())
    }

    fn validate_not_timestamp(&self) -> Result<(), Box<ValidationError>> {
        if self.query_type.is_timestamp() {
            return Err(Box::new(ValidationError {
                problem: format!(
                    "`self.query_type()` is `QueryType::{:?}`, which can only be written with \
                    `write_timestamp`",
                    self.query_type,
                )
                .into(),
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Writes a timestamp into the query at `offset` on the backend.
    ///
    /// The pool must be a timestamp pool. A timestamp query has no begin, so the query stays
    /// inactive.
    pub fn write_timestamp(&self, offset: u32) -> Result<(), Box<ValidationError>> {
        self.validate_write_timestamp(offset)
            .map_err(|err| self.report_error(err.add_context("write_timestamp")))?;

        self.handle.end_query(offset);

        Ok(())
    }

    fn validate_write_timestamp(&self, offset: u32) -> Result<(), Box<ValidationError>> {
        if !self.query_type.is_timestamp() {
            return Err(Box::new(ValidationError {
                problem: format!(
                    "`self.query_type()` is `QueryType::{:?}`, which is not a timestamp type",
                    self.query_type,
                )
                .into(),
                ..Default::default()
            }));
        }

        if !self.is_imported() {
            self.validate_offset(offset)?;
        }

        Ok(())
    }

    /// Resets the queries in `offset..offset + number` to the inactive state, and forwards the
    /// reset to the backend.
    ///
    /// The whole range must be within the pool; otherwise the error is reported, no query is
    /// changed and nothing is forwarded. A `number` of 0 resets nothing, but the offset must
    /// still be at most `self.query_count()`. For an imported pool, the range is not checked.
    pub fn reset_queries(&self, offset: u32, number: u32) -> Result<(), Box<ValidationError>> {
        self.validate_reset_queries(offset, number)
            .map_err(|err| self.report_error(err.add_context("reset_queries")))?;

        if !self.is_imported() {
            let end = offset + number;
            let mut current = offset;

            while current < end {
                let (word, _) = slot(current);
                let bit = current % u64::BITS;
                let count = (u64::BITS - bit).min(end - current);
                let mask = if count == u64::BITS {
                    u64::MAX
                } else {
                    ((1u64 << count) - 1) << bit
                };

                self.device_state[word].fetch_and(!mask, Ordering::AcqRel);
                current += count;
            }
        }

        self.handle.reset_queries(offset, number);

        Ok(())
    }

    fn validate_reset_queries(&self, offset: u32, number: u32) -> Result<(), Box<ValidationError>> {
        if self.is_imported() {
            // The range of an imported pool is unknown; whoever created it validates it.
            return Ok(());
        }

        match offset.checked_add(number) {
            Some(end) if end <= self.query_count => Ok(()),
            _ => Err(Box::new(ValidationError {
                problem: format!(
                    "`offset + number` ({} + {}) is greater than `self.query_count()` ({})",
                    offset, number, self.query_count,
                )
                .into(),
                ..Default::default()
            })),
        }
    }

    fn report_error(&self, err: Box<ValidationError>) -> Box<ValidationError> {
        self.device.report_error(self.object_info(), err)
    }
}

/// Returns the index of the state word and the bit mask of the query at `offset`.
#[inline]
fn slot(offset: u32) -> (usize, u64) {
    (
        (offset / u64::BITS) as usize,
        1 << (offset % u64::BITS),
    )
}

impl DeviceObject for QueryPoolVal<'_> {
    #[inline]
    fn device(&self) -> &DeviceVal {
        self.device
    }

    #[inline]
    fn object_info(&self) -> ObjectInfo {
        ObjectInfo {
            object_type: ObjectType::QueryPool,
            id: self.id,
        }
    }

    fn set_debug_name(&self, name: &str) {
        tracing::trace!(id = self.id.get(), name, "renamed query pool");
        self.handle.set_debug_name(name);
        self.device.context().set_object_name(self.id, name);
    }
}

impl Drop for QueryPoolVal<'_> {
    fn drop(&mut self) {
        self.device.context().forget_object(self.id);
        tracing::trace!(id = self.id.get(), "destroyed query pool");
    }
}

impl fmt::Debug for QueryPoolVal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPoolVal")
            .field("handle", &self.handle)
            .field("id", &self.id)
            .field("query_type", &self.query_type)
            .field("query_count", &self.query_count)
            .finish_non_exhaustive()
    }
}

impl_id_counter!(QueryPoolVal<'d>);

/// Parameters to create a new `QueryPoolVal`.
#[derive(Clone, Debug)]
pub struct QueryPoolCreateInfo {
    /// The type of query that the pool should be for.
    ///
    /// There is no default value.
    pub query_type: QueryType,

    /// The number of queries to create in the pool.
    ///
    /// The default value is `0`, which must be overridden. Pools with no tracked queries can
    /// only be [imported](QueryPoolVal::import).
    pub query_count: u32,

    pub _ne: crate::NonExhaustive,
}

impl QueryPoolCreateInfo {
    /// Returns a `QueryPoolCreateInfo` with the specified `query_type`.
    #[inline]
    pub fn query_type(query_type: QueryType) -> Self {
        Self {
            query_type,
            query_count: 0,
            _ne: crate::NonExhaustive(()),
        }
    }

    pub(crate) fn validate(&self, device: &DeviceVal) -> Result<(), Box<ValidationError>> {
        let &Self {
            query_type,
            query_count,
            _ne: _,
        } = self;

        if query_count == 0 {
            return Err(Box::new(ValidationError {
                context: "query_count".into(),
                problem: "is 0".into(),
            }));
        }

        if !device.handle().supports_query_type(query_type) {
            return Err(Box::new(ValidationError {
                context: "query_type".into(),
                problem: format!(
                    "is `QueryType::{:?}`, which the backend does not support",
                    query_type,
                )
                .into(),
            }));
        }

        Ok(())
    }
}

/// The type of query that a query pool should perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum QueryType {
    /// Writes timestamps at chosen points in a command buffer.
    ///
    /// Used with [`write_timestamp`](QueryPoolVal::write_timestamp).
    Timestamp,

    /// Writes timestamps on a copy queue, which may have a different frequency.
    ///
    /// Used with [`write_timestamp`](QueryPoolVal::write_timestamp).
    TimestampCopyQueue,

    /// Tracks the number of samples that pass per-fragment tests (e.g. the depth test).
    ///
    /// Used with [`begin_query`](QueryPoolVal::begin_query) and
    /// [`end_query`](QueryPoolVal::end_query).
    Occlusion,

    /// Like `Occlusion`, but only reports whether any sample passed.
    BinaryOcclusion,

    /// Tracks statistics on pipeline invocations and their input data.
    PipelineStatistics,
}

impl QueryType {
    /// Returns whether queries of this type are written with a single timestamp command rather
    /// than with a begin/end pair.
    #[inline]
    pub const fn is_timestamp(self) -> bool {
        matches!(self, QueryType::Timestamp | QueryType::TimestampCopyQueue)
    }
}
