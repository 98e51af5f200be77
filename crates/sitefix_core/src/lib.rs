pub mod ai;
pub mod apply;
pub mod config;
pub mod crawl;
pub mod csv;
pub mod export;
pub mod plugins;
pub mod rewrite;
pub mod seo;
pub mod session;
pub mod transport;
pub mod wordpress;

#[cfg(test)]
mod test_support;
