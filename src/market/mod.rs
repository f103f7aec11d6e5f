//! Boundary to the external compute marketplace.
//!
//! The engine never talks to providers directly. It opens a budgeted session
//! on a [`Marketplace`], reads the offers it advertises, engages one provider
//! at a time into an [`Activity`], and drives remote operations through it.
//! [`GatewayClient`] is the HTTP implementation used by the worker binary.

pub mod client;
pub mod error;
pub mod types;

use std::path::Path;

pub use client::{GatewayActivity, GatewayClient};
pub use error::MarketError;
pub use types::{CommandOutput, Offer, Pricing, ProviderId, SessionRequest};

/// A budgeted requestor session on the marketplace.
///
/// All methods take `&self`: the supervisor keeps several engagements and
/// pipelines in flight on one thread, each borrowing the marketplace.
#[allow(async_fn_in_trait)]
pub trait Marketplace {
    type Activity: Activity;

    /// Opens the session. Failure here means payment or account bootstrap
    /// failed, and no frame work may start.
    async fn open(&self, request: &SessionRequest) -> Result<(), MarketError>;

    /// Offers currently matching the session's requirement, in marketplace
    /// ranking order.
    async fn offers(&self) -> Result<Vec<Offer>, MarketError>;

    /// Signs an agreement with the offer's provider and creates an activity.
    async fn engage(&self, offer: &Offer) -> Result<Self::Activity, MarketError>;

    /// Terminates an activity and settles its agreement.
    async fn release(&self, activity: Self::Activity) -> Result<(), MarketError>;

    /// Closes the session; outstanding activities are terminated remotely.
    async fn close(&self) -> Result<(), MarketError>;
}

/// A running activity on one provider: remote filesystem plus command execution.
#[allow(async_fn_in_trait)]
pub trait Activity {
    fn provider_id(&self) -> &ProviderId;

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), MarketError>;

    /// Runs `script` under `/bin/sh -c` on the provider.
    async fn run(&self, script: &str) -> Result<CommandOutput, MarketError>;

    /// Fetches `remote` into `local`. A missing remote file is
    /// [`MarketError::NotFound`].
    async fn download(&self, remote: &str, local: &Path) -> Result<(), MarketError>;
}
