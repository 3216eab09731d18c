pub mod scrape;
pub mod serve;
