use tokio_util::sync::CancellationToken;

use publisher::{MqttBroker, Outcome, RecordSequence, Scheduler};

use super::config::Effective;
use super::error::FilePublisherError;

// ═══════════════════════════════════════════════════════════════
//  Load → connect → replay
// ═══════════════════════════════════════════════════════════════

pub async fn run(eff: &Effective) -> Result<Outcome, FilePublisherError> {
    let records = RecordSequence::load(&eff.value_file)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            trigger.cancel();
        }
    });

    tracing::info!(
        topic = %eff.topic,
        records = records.len(),
        file = %eff.value_file.display(),
        "file data publisher started"
    );

    let mut scheduler = Scheduler::new(eff.scheduler_config(), records);
    let outcome = scheduler.run(&mut MqttBroker, cancel).await?;
    Ok(outcome)
}
