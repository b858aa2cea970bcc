pub mod merx;

pub use merx::MerxCommand;
