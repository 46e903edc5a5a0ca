//! Defines the Component trait, the common interface of every processing
//! stage that runs on its own thread. A stage consumes items from a bounded
//! input channel, converts them, and passes zero or more results on to the
//! next stage.

use crate::error::LocatorError;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{info, warn};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long a stage waits for input before it checks the stop flag again.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

///
/// A stage in the locator pipeline. Everything that runs under
/// [`run_component`] implements this.
///
pub trait Component: Display {
    /// What the stage consumes
    type InData;
    /// What the stage produces
    type OutData;

    /// Converts one input into any number of outputs.
    fn convert(&mut self, input: Self::InData) -> Vec<Self::OutData>;

    /// Cleans up at termination of pipeline
    fn finalize(&mut self) -> Result<(), LocatorError>;
}

/// Runs the given Component on its own thread until `running` is cleared or
/// the input channel disconnects. Input still queued when the stage is
/// stopped is discarded. A full or disconnected output drops the result with
/// a warning; a stage never blocks on its consumer.
pub fn run_component<C>(
    mut component: C,
    input: Receiver<C::InData>,
    output: Sender<C::OutData>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, LocatorError>
where
    C: Component + Send + 'static,
    C::InData: Send + 'static,
    C::OutData: Send + 'static,
{
    let name = component.to_string();
    let handle = thread::Builder::new().name(name).spawn(move || {
        info!("{} : started.", component);
        while running.load(Ordering::Acquire) {
            let data = match input.recv_timeout(POLL_INTERVAL) {
                Ok(data) => data,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            for out_data in component.convert(data) {
                match output.try_send(out_data) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("{} : output full, result dropped.", component);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        warn!("{} : output disconnected, result dropped.", component);
                    }
                }
            }
        }

        let discarded = input.try_iter().count();
        if discarded > 0 {
            info!("{} : discarded {} queued items.", component, discarded);
        }

        if let Err(component_error) = component.finalize() {
            warn!("{} : error during terminating : {}.", component, component_error);
        }
        info!("{} : terminated.", component);
    })?;

    Ok(handle)
}
