//! Load, decide, append.

use std::marker::PhantomData;
use std::time::Duration;

use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, EventStoreError, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Outcome of a committed command.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// State after the new events were applied.
    pub aggregate: A,

    /// Events that were persisted. Empty when the command was a no-op.
    pub events: Vec<A::Event>,

    pub new_version: Version,
}

/// Runs commands against one aggregate type.
///
/// Each attempt loads the stream, lets the command decide its events and
/// appends them with the loaded version as the expected version. A stale
/// version means another writer got there first: the stream is reloaded and
/// the command decided again, up to `max_conflict_retries` times.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    commit_timeout: Duration,
    max_conflict_retries: u32,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            commit_timeout: Duration::from_secs(3),
            max_conflict_retries: 3,
            _phantom: PhantomData,
        }
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Folds the stream. A stream without events yields `A::default()`.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Decides and persists events for `aggregate_id`.
    ///
    /// `command_fn` may run more than once, so it must not have side effects.
    /// An empty event list commits nothing and returns the loaded state.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut conflicts = 0;

        loop {
            let mut aggregate = self.load(aggregate_id).await?;
            let current_version = aggregate.version();

            let events = command_fn(&aggregate)?;
            if events.is_empty() {
                return Ok(CommandResult {
                    aggregate,
                    events,
                    new_version: current_version,
                });
            }

            let envelopes = self.build_envelopes(aggregate_id, current_version, &events)?;
            let options = AppendOptions::expect_version(current_version)
                .with_timeout(self.commit_timeout);

            match self.store.append(envelopes, options).await {
                Ok(new_version) => {
                    aggregate.apply_events(events.iter().cloned());
                    aggregate.set_version(new_version);
                    return Ok(CommandResult {
                        aggregate,
                        events,
                        new_version,
                    });
                }
                Err(EventStoreError::ConcurrencyConflict {
                    expected, actual, ..
                }) if conflicts < self.max_conflict_retries => {
                    conflicts += 1;
                    metrics::counter!("order_command_conflicts_total").increment(1);
                    tracing::debug!(
                        %aggregate_id,
                        %expected,
                        %actual,
                        attempt = conflicts,
                        "stream moved while deciding, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let mut builder = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?;
            for (key, value) in event.metadata() {
                builder = builder.metadata(key, serde_json::Value::String(value));
            }
            envelopes.push(builder.build()?);
        }

        Ok(envelopes)
    }
}
