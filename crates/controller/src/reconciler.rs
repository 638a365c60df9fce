use std::{sync::Arc, time::Duration};

use futures::Stream;
use k8s_openapi::api::core::v1::Event;
use kube::{
    Api, Client,
    runtime::{
        Controller,
        controller::{Action, Error as ControllerError},
        reflector::ObjectRef,
        watcher,
    },
};
use tracing::{Level, instrument};

use crate::{
    Error, Result,
    config::RemediationConfig,
    inventory::{ScaleSetInventory, detach_disk},
    message::DetachConflict,
};

/// Warning events raised by the attach/detach controller.
pub const DEFAULT_FIELD_SELECTOR: &str = "type=Warning,reason=FailedAttachVolume";

pub struct ReconcilerCtx {
    pub inventory: Arc<dyn ScaleSetInventory>,
    pub remediation: RemediationConfig,
    pub retry_delay: Duration,
}

pub fn control_loop(
    client: Client,
    field_selector: String,
    context: ReconcilerCtx,
) -> impl Stream<Item = Result<(ObjectRef<Event>, Action), ControllerError<Error, watcher::Error>>>
{
    let events = Api::<Event>::all(client);

    Controller::new(events, watcher::Config::default().fields(&field_selector))
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(context))
}

#[instrument(level = Level::DEBUG, skip(context))]
async fn reconcile(event: Arc<Event>, context: Arc<ReconcilerCtx>) -> Result<Action> {
    tracing::info!("Reconciling...");

    let message = event.message.as_deref().unwrap_or_default();
    remediate(message, context.inventory.as_ref(), &context.remediation).await?;

    // A count bump on this event re-runs reconcile, which then reports DiskNotFound
    Ok(Action::await_change())
}

/// Detach the disk named in an attach-conflict message from the instance
/// that still holds it.
pub async fn remediate<I>(
    message: &str,
    inventory: &I,
    config: &RemediationConfig,
) -> Result<DetachConflict>
where
    I: ScaleSetInventory + ?Sized,
{
    let conflict = DetachConflict::parse(message)?;
    detach_disk(
        inventory,
        &conflict.instance(),
        &conflict.disk_name,
        config,
    )
    .await?;

    Ok(conflict)
}

fn error_policy(_event: Arc<Event>, error: &Error, context: Arc<ReconcilerCtx>) -> Action {
    if error.is_retryable() {
        Action::requeue(context.retry_delay)
    } else {
        Action::await_change()
    }
}
