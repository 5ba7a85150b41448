//! Property observation on top of requests and events.
//!
//! MPV reports observed properties through one `property-change` event.
//! The relay re-emits each of those under the property's own name, and
//! every [`Observation`] listens there for updates tagged with its id.

use serde_json::Value;

use crate::client::MpvClient;
use crate::error::MpvError;
use crate::events::{EventBus, Subscription};
use crate::protocol::{PropertyChange, PROPERTY_CHANGE};

/// Property updates keyed by property name.
pub(crate) type PropertyBus = EventBus<PropertyChange>;

/// Forward `property-change` events from `events` to `observables`.
pub(crate) fn relay_property_changes(events: &EventBus<Value>, observables: &PropertyBus) -> Subscription {
  let observables = observables.clone();
  events.on(PROPERTY_CHANGE, move |body| {
    match serde_json::from_value::<PropertyChange>(body.clone()) {
      Ok(change) => observables.emit(&change.name, &change),
      Err(e) => log::warn!("Malformed property-change event: {} - {}", e, body),
    }
  })
}

/// An active property subscription.
///
/// Dropping the handle stops the local callback but leaves MPV observing;
/// use [`Observation::unobserve`] to end both.
#[must_use = "dropping an Observation stops its callback"]
pub struct Observation {
  id: i64,
  property: String,
  client: MpvClient,
  subscription: Option<Subscription>,
}

impl Observation {
  /// Observer id used with `observe_property`/`unobserve_property`.
  pub fn id(&self) -> i64 {
    self.id
  }

  pub fn property(&self) -> &str {
    &self.property
  }

  /// Stop observing. The local callback is removed even if MPV rejects
  /// the `unobserve_property` command.
  pub async fn unobserve(mut self) -> Result<(), MpvError> {
    if let Some(subscription) = self.subscription.take() {
      subscription.unsubscribe();
    }
    self
      .client
      .command("unobserve_property", vec![self.id.into()])
      .await
      .map(|_| ())
  }
}

impl Drop for Observation {
  fn drop(&mut self) {
    if let Some(subscription) = self.subscription.take() {
      subscription.unsubscribe();
    }
  }
}

impl std::fmt::Debug for Observation {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Observation")
      .field("id", &self.id)
      .field("property", &self.property)
      .finish()
  }
}

impl MpvClient {
  /// Observe a property for changes.
  ///
  /// `callback` receives the new value of `property` on every change. It is
  /// registered only after MPV accepts `observe_property`; if that command
  /// fails, nothing is registered and the error is returned.
  pub async fn observe<F>(&self, property: &str, callback: F) -> Result<Observation, MpvError>
  where
    F: Fn(&Value) + Send + Sync + 'static,
  {
    let id = self.inner.requests.lock().allocate_id();
    self
      .command("observe_property", vec![id.into(), property.into()])
      .await?;

    let subscription = self.inner.observables.on(property, move |change: &PropertyChange| {
      // Several observers may watch one property; each only takes its own updates.
      if change.id.map_or(true, |observer| observer == id) {
        callback(&change.data);
      }
    });
    log::debug!("Observing MPV property {} (id={})", property, id);

    Ok(Observation {
      id,
      property: property.to_string(),
      client: self.clone(),
      subscription: Some(subscription),
    })
  }
}
