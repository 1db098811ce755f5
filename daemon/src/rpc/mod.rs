mod api;

pub use api::ChainApi;
