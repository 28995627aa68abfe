/// Gives a validated object a process-unique `id` and implements `PartialEq`, `Eq` and `Hash` in
/// terms of it. The type must have an `id: NonZero<u64>` field.
macro_rules! impl_id_counter {
    ($type:ident $(< $lt:lifetime >)?) => {
        impl $(< $lt >)? $type $(< $lt >)? {
            fn next_id() -> std::num::NonZero<u64> {
                use std::{
                    num::NonZero,
                    sync::atomic::{AtomicU64, Ordering},
                };

                static COUNTER: AtomicU64 = AtomicU64::new(1);

                NonZero::<u64>::new(COUNTER.fetch_add(1, Ordering::Relaxed)).unwrap_or_else(|| {
                    eprintln!("an ID counter has overflown ...somehow");
                    std::process::abort();
                })
            }
        }

        impl $(< $lt >)? PartialEq for $type $(< $lt >)? {
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl $(< $lt >)? Eq for $type $(< $lt >)? {}

        impl $(< $lt >)? std::hash::Hash for $type $(< $lt >)? {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }
    };
}

pub(crate) use impl_id_counter;
