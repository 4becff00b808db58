pub mod audit;
pub mod config;
pub mod lock;
pub mod paths;
pub mod pipeline;
pub mod qmd;
pub mod reconcile;
pub mod resolver;
pub mod search;
pub mod state;
pub mod transcript;
pub mod util;
pub mod warn;
