pub mod model;
pub mod score;
pub mod snowflake;
pub mod util;
