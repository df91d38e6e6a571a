//! One admission per store transaction.

use std::sync::Arc;

use tracing::{debug, info};

use crate::admission::{Admission, AdmissionRequest, Rejection, admit};
use crate::alert::{AlertSink, TracingAlertSink};
use crate::store::{ConfigStore, StoreError};

/// Outcome of a completed admission cycle.
pub type AdmissionOutcome = Result<Admission, Rejection>;

/// Runs admissions against a [`ConfigStore`] and reports rejections.
///
/// The store's writer section covers the whole decide-and-mutate cycle.
/// Rejections are handed to the alert sink after the section is left, so a
/// slow sink never holds up other requests.
#[derive(Clone)]
pub struct PageGate {
    store: ConfigStore,
    alerts: Arc<dyn AlertSink>,
}

impl std::fmt::Debug for PageGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGate")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl PageGate {
    /// Creates a gate that logs rejections through `tracing`.
    #[must_use]
    pub fn new(store: ConfigStore) -> Self {
        Self::with_alerts(store, Arc::new(TracingAlertSink))
    }

    /// Creates a gate with a custom alert sink.
    #[must_use]
    pub fn with_alerts(store: ConfigStore, alerts: Arc<dyn AlertSink>) -> Self {
        Self { store, alerts }
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Runs one admission cycle.
    ///
    /// This blocks on the store's writer section and on backend I/O; async
    /// callers should run it on a blocking thread.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the document cannot be loaded or persisted.
    /// An admission rejection is not an error; it is the `Err` side of the
    /// returned [`AdmissionOutcome`].
    pub fn handle(&self, request: &AdmissionRequest) -> Result<AdmissionOutcome, StoreError> {
        let mut rng = rand::thread_rng();
        let outcome = self
            .store
            .update(|document| admit(document, request, &mut rng))?;

        match &outcome {
            Ok(admission) => {
                if admission.ip_bound || admission.cookie_issued {
                    info!(
                        page = %admission.page,
                        remote_ip = %request.remote_ip,
                        ip_bound = admission.ip_bound,
                        cookie_issued = admission.cookie_issued,
                        "new binding recorded"
                    );
                } else {
                    debug!(page = %admission.page, remote_ip = %request.remote_ip, "admitted");
                }
            },
            Err(rejection) => self.alerts.deliver(&rejection.diagnostic),
        }

        Ok(outcome)
    }
}
