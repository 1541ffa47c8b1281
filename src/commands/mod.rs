pub mod demo;
pub mod policy;
pub mod run;
