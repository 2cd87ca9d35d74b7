//! # Branchpass
//!
//! HTTP surface for a branch-aware authentication gateway. Each branch office
//! runs one instance, headquarters runs another, and all of them share a
//! signing key and a branch table.
//!
//! ## Routes
//!
//! - `POST /login` authenticates and returns a credential bound to the branch
//!   that served the login
//! - `GET /branch/switch/{targetBranchId}` redirects a headquarters or
//!   superuser session to another branch's instance with a handoff token
//! - `GET /auth/switchLogin?switch_token=...` redeems a handoff token and
//!   redirects into the app, always with a 302
//! - `GET /session` returns the claims of the presented credential
//!
//! Every route sits behind the locality guard, which refuses a credential
//! used away from its home branch unless that home branch is headquarters.
//!
//! ## Running
//!
//! ```no_run
//! use branchpass::{serve, AppState};
//! use branchpass_config::GatewayConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_toml("/etc/branchpass/config.toml")?;
//! let state = AppState::from_config(&config)?;
//! let listener = tokio::net::TcpListener::bind(config.socket_addr()?).await?;
//! serve(listener, state).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use middleware::{bearer_token, serving_request, ServingSocket};
pub use routes::{router, LoginRequest, LoginResponse};
pub use server::{serve, AppState};
