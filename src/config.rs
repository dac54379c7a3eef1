/*!
The read configuration: which receivers to build and how to derive offsets
and timestamps from their records.

[`ReadConfig`] is an immutable value. Every setter consumes it and returns a
new configuration, failing right away with a [`ConfigurationError`] when it
is handed an absent or unusable argument. Completeness is checked later by
[`ReadConfig::validate`], which [`ReadConfig::create_reader`] runs before any
receiver is built.

```ignore
let config = ReadConfig::new()
    .with_receiver_factory(ReceiverBuilder::new(MyReceiver::new).with_constructor_args(args))?
    .with_offset_fn(OffsetFn::new(|record: &String| Ok(record.parse()?)))?
    .with_timestamp_fn(TimestampFn::arrival_time())?;
config.validate()?;
let reader = config.create_reader(None)?;
```
*/

use log::warn;
use std::{fmt, time::Duration};

use crate::{
    checkpoint::CheckpointMark,
    error::{ConfigurationError, ValidationError},
    extract::{Extractors, OffsetFn, TimestampFn},
    factory::ReceiverFactory,
    models::{Offset, Record},
    reader::SourceReader,
    settings::ReaderSettings,
};

pub struct ReadConfig<T> {
    receiver_factory: Option<Box<dyn ReceiverFactory<T>>>,
    offset_fn: Option<OffsetFn<T>>,
    timestamp_fn: Option<TimestampFn<T>>,
    settings: ReaderSettings,
}

impl<T> Default for ReadConfig<T> {
    fn default() -> Self {
        ReadConfig {
            receiver_factory: None,
            offset_fn: None,
            timestamp_fn: None,
            settings: ReaderSettings::default(),
        }
    }
}

impl<T> Clone for ReadConfig<T> {
    fn clone(&self) -> Self {
        ReadConfig {
            receiver_factory: self.receiver_factory.clone(),
            offset_fn: self.offset_fn.clone(),
            timestamp_fn: self.timestamp_fn.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<T> fmt::Debug for ReadConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadConfig")
            .field("receiver_factory", &self.receiver_factory.is_some())
            .field("offset_fn", &self.offset_fn.is_some())
            .field("timestamp_fn", &self.timestamp_fn.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl<T> ReadConfig<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_receiver_factory<F>(
        self,
        receiver_factory: impl Into<Option<F>>,
    ) -> Result<Self, ConfigurationError>
    where
        F: ReceiverFactory<T> + 'static,
    {
        let receiver_factory = receiver_factory
            .into()
            .ok_or(ConfigurationError::MissingArgument("receiver factory"))?;
        Ok(ReadConfig {
            receiver_factory: Some(Box::new(receiver_factory)),
            ..self
        })
    }

    pub fn with_offset_fn(
        self,
        offset_fn: impl Into<Option<OffsetFn<T>>>,
    ) -> Result<Self, ConfigurationError> {
        let offset_fn = offset_fn
            .into()
            .ok_or(ConfigurationError::MissingArgument("offset function"))?;
        Ok(ReadConfig {
            offset_fn: Some(offset_fn),
            ..self
        })
    }

    pub fn with_timestamp_fn(
        self,
        timestamp_fn: impl Into<Option<TimestampFn<T>>>,
    ) -> Result<Self, ConfigurationError> {
        let timestamp_fn = timestamp_fn
            .into()
            .ok_or(ConfigurationError::MissingArgument("timestamp function"))?;
        Ok(ReadConfig {
            timestamp_fn: Some(timestamp_fn),
            ..self
        })
    }

    /// Applies a whole bundle of tunables at once.
    pub fn with_settings(
        self,
        settings: ReaderSettings,
    ) -> Result<Self, ConfigurationError> {
        settings.validate()?;
        Ok(ReadConfig { settings, ..self })
    }

    /// First offset delivered by a reader that is not resumed from a
    /// checkpoint.
    pub fn with_start_offset(self, start_offset: Offset) -> Self {
        let settings = ReaderSettings {
            start_offset,
            ..self.settings.clone()
        };
        ReadConfig { settings, ..self }
    }

    pub fn with_buffer_capacity(
        self,
        buffer_capacity: usize,
    ) -> Result<Self, ConfigurationError> {
        let settings = ReaderSettings {
            buffer_capacity,
            ..self.settings.clone()
        };
        self.with_settings(settings)
    }

    pub fn with_poll_timeout(
        self,
        poll_timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        let settings = ReaderSettings {
            poll_timeout,
            ..self.settings.clone()
        };
        self.with_settings(settings)
    }

    pub fn with_restart_delay(self, restart_delay: Duration) -> Self {
        let settings = ReaderSettings {
            restart_delay,
            ..self.settings.clone()
        };
        ReadConfig { settings, ..self }
    }

    pub fn receiver_factory(&self) -> Option<&dyn ReceiverFactory<T>> {
        self.receiver_factory.as_deref()
    }

    pub fn offset_fn(&self) -> Option<&OffsetFn<T>> {
        self.offset_fn.as_ref()
    }

    pub fn timestamp_fn(&self) -> Option<&TimestampFn<T>> {
        self.timestamp_fn.as_ref()
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    /// Checks that the configuration can produce readers. The receiver
    /// factory and the offset function are required. Without a timestamp
    /// function records are stamped with their arrival time.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.receiver_factory.is_none() {
            return Err(ValidationError::Missing("receiver factory"));
        }
        if self.offset_fn.is_none() {
            return Err(ValidationError::Missing("offset function"));
        }
        Ok(())
    }
}

impl<T: Record> ReadConfig<T> {
    /// Validates the configuration and creates a reader. A reader resumed
    /// from `checkpoint` never delivers an offset at or below it.
    pub fn create_reader(
        &self,
        checkpoint: Option<CheckpointMark>,
    ) -> Result<SourceReader<T>, ValidationError> {
        self.validate()?;
        let (Some(receiver_factory), Some(offset_fn)) =
            (&self.receiver_factory, &self.offset_fn)
        else {
            return Err(ValidationError::Missing("receiver factory"));
        };
        let timestamp_fn = match &self.timestamp_fn {
            Some(timestamp_fn) => timestamp_fn.clone(),
            None => {
                warn!("no timestamp function configured, using arrival time");
                TimestampFn::arrival_time()
            }
        };
        Ok(SourceReader::new(
            receiver_factory.clone(),
            Extractors::new(offset_fn.clone(), timestamp_fn),
            self.settings.clone(),
            checkpoint,
        ))
    }
}
