pub mod run;
pub mod stations;
