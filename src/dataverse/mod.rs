//! Backend data service client.

mod client;
#[cfg(test)]
pub mod testing;
mod types;

use async_trait::async_trait;
use color_eyre::Result;

pub use client::DataverseClient;
pub use types::{
  Absence, AbsenceData, NewUser, Participation, ParticipationData, User, ABSENCE_TYPES,
  MAX_DESCRIPTION_LEN, STATUS_REGISTERED,
};

/// Remote mutations the app performs, online or replayed from the offline queue.
#[async_trait]
pub trait Backend: Send + Sync {
  async fn create_participation(&self, user_id: &str, data: &ParticipationData) -> Result<()>;

  async fn create_absence(&self, user_id: &str, data: &AbsenceData) -> Result<()>;
}
