pub mod http_client_factory;
pub mod token_bucket;
