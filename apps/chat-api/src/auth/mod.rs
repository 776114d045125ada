pub mod authorizer;
pub mod middleware;
pub mod tokens;
