use anyhow::{Context, Result};
use std::marker::PhantomData;

/// A batch-level processing step.
///
/// A `Transform<I, O>` turns an input of type `I` into an output of type `O`.
/// Steps compose with `.then(...)` into a single pipeline, for example a
/// language-token rewrite followed by switchout on the source tokens.
///
/// Note: `then()` works only when:
/// 1. **Types align**: `self: Transform<I, O>`, `next: Transform<O, M>`
/// 2. **Owned**: `Self::Sized` (no trait objects, must be concrete)
/// 3. **Thread-safe**: intermediate and output types must be `Send`
pub trait Transform<I, O>: Send + Sync {
    fn apply(&self, input: I) -> Result<O>;

    #[inline]
    fn then<T, M>(self, next: T) -> Chain<Self, T, O>
    where
        Self: Sized,
        T: Transform<O, M>,
        O: Send,
        M: Send,
    {
        Chain::new(self, next)
    }
}

/// Two transforms applied one after the other (`A` then `B`).
#[derive(Debug)]
pub struct Chain<A, B, M> {
    first: A,
    second: B,
    _marker: PhantomData<fn() -> M>,
}

impl<A, B, M> Chain<A, B, M> {
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            _marker: PhantomData,
        }
    }
}

impl<I, M, O, A, B> Transform<I, O> for Chain<A, B, M>
where
    A: Transform<I, M>,
    B: Transform<M, O>,
    M: Send,
{
    fn apply(&self, input: I) -> Result<O> {
        let mid = self.first.apply(input)?;
        self.second.apply(mid).with_context(|| {
            format!(
                "{} failed after {}",
                std::any::type_name::<B>(),
                std::any::type_name::<A>()
            )
        })
    }
}

/// Leaves its input untouched. Handy as the neutral element when a pipeline
/// is assembled from optional steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<T: Send> Transform<T, T> for Identity {
    fn apply(&self, input: T) -> Result<T> {
        Ok(input)
    }
}

impl<I, T> Transform<I, I> for Option<T>
where
    T: Transform<I, I>,
    I: Send,
{
    fn apply(&self, input: I) -> Result<I> {
        match self {
            Some(step) => step.apply(input),
            None => Ok(input),
        }
    }
}
