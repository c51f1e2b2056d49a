// wirecall-testkit: raw-frame TCP peers for integration testing.
//
// The mock server and client speak the wire format directly (fixed head,
// serde_json structured heads) without going through the runtime under
// test, so suites can observe and inject exact bytes: count keepalives,
// capture frame heads, or reply with payloads of arbitrary size.

pub mod mock_client;
pub mod mock_server;

pub use mock_client::MockRpcClient;
pub use mock_server::{MockRpcServer, Responder};
