mod api;
mod rpc;

pub use api::HealthResponse;
pub use rpc::{JSONRPC_VERSION, RpcError, RpcRequest, RpcResponse, ToolCallParams, error_codes};
