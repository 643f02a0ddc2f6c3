//! Webhook gateway: HTTP listener, route table and dispatch bridge.

pub mod dispatch;
pub mod routes;
mod server;

pub use routes::{HEALTH_PATH, RouteTable, WebhookRoute};
pub use server::{GatewayServer, GatewayState};
