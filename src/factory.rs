/*!
Factories producing fresh [`Receiver`] instances.

A reader calls its factory once on start and once more after every receiver
failure, so each call has to return an independent instance. Two factories
are provided:

- [`ReceiverBuilder`] stores a constructor together with its arguments and
  clones the arguments for every instance.
- [`from_fn`] turns a closure into a factory.

A factory error is a [`ConstructionError`] and stops the reader for good.
*/

use dyn_clone::DynClone;
use std::{fmt, sync::Arc};

use crate::{error::ConstructionError, receiver::Receiver};

/// A trait that abstracts the creation of receivers.
pub trait ReceiverFactory<T>: DynClone + Send + Sync {
    fn build(&self) -> Result<Box<dyn Receiver<T>>, ConstructionError>;
}

impl<T> Clone for Box<dyn ReceiverFactory<T>> {
    fn clone(&self) -> Self {
        dyn_clone::clone_box(&**self)
    }
}

type Constructor<R, A> = dyn Fn(A) -> Result<R, anyhow::Error> + Send + Sync;

/// Builds receivers of type `R` by calling a constructor with a clone of
/// the stored constructor arguments.
///
/// ```ignore
/// let builder = ReceiverBuilder::new(MyReceiver::connect)
///     .with_constructor_args(("localhost".to_string(), 9000));
/// ```
pub struct ReceiverBuilder<R, A> {
    constructor: Arc<Constructor<R, A>>,
    args: Option<A>,
}

impl<R, A> ReceiverBuilder<R, A> {
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn(A) -> Result<R, anyhow::Error> + Send + Sync + 'static,
    {
        ReceiverBuilder {
            constructor: Arc::new(constructor),
            args: None,
        }
    }

    pub fn with_constructor_args(self, args: A) -> Self {
        ReceiverBuilder {
            args: Some(args),
            ..self
        }
    }

    pub fn constructor_args(&self) -> Option<&A> {
        self.args.as_ref()
    }
}

impl<R, A: Clone> Clone for ReceiverBuilder<R, A> {
    fn clone(&self) -> Self {
        ReceiverBuilder {
            constructor: Arc::clone(&self.constructor),
            args: self.args.clone(),
        }
    }
}

impl<R, A: fmt::Debug> fmt::Debug for ReceiverBuilder<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverBuilder")
            .field("receiver", &std::any::type_name::<R>())
            .field("args", &self.args)
            .finish()
    }
}

impl<T, R, A> ReceiverFactory<T> for ReceiverBuilder<R, A>
where
    R: Receiver<T> + 'static,
    A: Clone + Send + Sync + 'static,
{
    fn build(&self) -> Result<Box<dyn Receiver<T>>, ConstructionError> {
        let args = self
            .args
            .clone()
            .ok_or(ConstructionError::MissingConstructorArgs)?;
        let receiver =
            (self.constructor)(args).map_err(ConstructionError::Failed)?;
        Ok(Box::new(receiver))
    }
}

/// A factory backed by a closure. Created with [`from_fn`].
#[derive(Clone)]
pub struct FnReceiverFactory<F> {
    f: F,
}

/// Turns a closure returning a new receiver into a [`ReceiverFactory`].
pub fn from_fn<F, R>(f: F) -> FnReceiverFactory<F>
where
    F: Fn() -> Result<R, anyhow::Error> + Clone + Send + Sync,
{
    FnReceiverFactory { f }
}

impl<F> fmt::Debug for FnReceiverFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnReceiverFactory")
    }
}

impl<T, R, F> ReceiverFactory<T> for FnReceiverFactory<F>
where
    R: Receiver<T> + 'static,
    F: Fn() -> Result<R, anyhow::Error> + Clone + Send + Sync,
{
    fn build(&self) -> Result<Box<dyn Receiver<T>>, ConstructionError> {
        let receiver = (self.f)().map_err(ConstructionError::Failed)?;
        Ok(Box::new(receiver))
    }
}
