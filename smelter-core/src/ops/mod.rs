pub mod bronze;
pub mod catalogue;
pub mod runs;
pub mod silver;
pub mod watermarks;
