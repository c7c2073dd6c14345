use crate::backend::{Backend, Enrollment, MessageResponse};
use crate::error::{ConsoleError, ConsoleResult};
use crate::model::Resource;
use crate::store::{Action, Notice, Store};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const SAVED: &str = "Resource saved successfully";
pub const DELETED: &str = "Resource deleted successfully";

const FETCH_FAILED: &str = "Error fetching resources. Please try again later.";
const UNEXPECTED: &str = "An unexpected error occurred.";
const SAVE_FAILED: &str = "An error occurred while saving the resource.";
const DELETE_REFUSED: &str = "Failed to delete resource.";
const DELETE_FAILED: &str = "An error occurred while deleting the resource.";

/// Enrolled machines. Every mutation is followed by a full re-fetch, the list is never patched locally.
pub struct ResourceDirectory<B: Backend> {
    backend: Arc<B>,
    store: Store,
}

impl<B: Backend> ResourceDirectory<B> {
    pub fn new(backend: Arc<B>, store: Store) -> Self {
        Self { backend, store }
    }

    pub async fn list(&self) -> ConsoleResult<Vec<Resource>> {
        self.store.dispatch(Action::ResourcesLoading).await;
        match self.backend.list_resources().await {
            Ok(records) => {
                let resources = Resource::decorate(records);
                info!("Fetched {} resources", resources.len());
                self.store
                    .dispatch(Action::ResourcesLoaded(resources.clone()))
                    .await;
                Ok(resources)
            }
            Err(e) => {
                error!("Error fetching resources: {}", e);
                self.store
                    .dispatch(Action::ResourcesFailed(FETCH_FAILED.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    pub async fn open_enrollment(&self) {
        self.store.dispatch(Action::EnrollmentOpened).await;
    }

    pub async fn close_enrollment(&self) {
        self.store.dispatch(Action::EnrollmentClosed).await;
    }

    /// Posts the credentials. The form closes only on the exact success message.
    pub async fn enroll(&self, ip_address: &str, username: &str, password: &str) -> Notice {
        let enrollment = Enrollment {
            ip_address: ip_address.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        };
        info!("Enrolling resource {}", ip_address);
        let notice = Self::judge(self.backend.save_resource(&enrollment).await, SAVED, UNEXPECTED, SAVE_FAILED);
        self.store
            .dispatch(Action::ResourceNotice(notice.clone()))
            .await;
        if let Notice::Success(_) = notice {
            self.refetch().await;
            self.close_enrollment().await;
        }
        notice
    }

    pub async fn delete(&self, ip_address: &str) -> Notice {
        info!("Deleting resource {}", ip_address);
        let notice = Self::judge(
            self.backend.delete_resource(ip_address).await,
            DELETED,
            DELETE_REFUSED,
            DELETE_FAILED,
        );
        self.store
            .dispatch(Action::ResourceNotice(notice.clone()))
            .await;
        if let Notice::Success(_) = notice {
            self.refetch().await;
        }
        notice
    }

    /// Stores the search query, `AppState.resources.visible()` applies it
    pub async fn filter(&self, query: &str) -> Vec<Resource> {
        self.store
            .dispatch(Action::ResourceQueryChanged(query.to_string()))
            .await;
        self.store
            .read(|s| s.resources.visible().into_iter().cloned().collect())
            .await
    }

    async fn refetch(&self) {
        // A failed re-fetch already shows its own banner
        let _ = self.list().await;
    }

    fn judge(
        reply: ConsoleResult<MessageResponse>,
        success: &str,
        unexpected: &str,
        failed: &str,
    ) -> Notice {
        match reply {
            Ok(reply) if reply.is(success) => Notice::Success(success.to_string()),
            Ok(reply) => {
                warn!("Backend answered: {:?}", reply.message);
                Notice::Error(
                    reply
                        .message
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| unexpected.to_string()),
                )
            }
            Err(e @ ConsoleError::Rejected { .. }) => {
                warn!("Backend rejected the request: {}", e);
                Notice::Error(e.user_message(failed))
            }
            Err(e) => {
                error!("Request failed: {}", e);
                Notice::Error(failed.to_string())
            }
        }
    }
}
