//! Plain data types shared by analysis, policy, sandbox and supervision.

pub mod command;
pub mod ids;
pub mod policy;
pub mod run;
pub mod sandbox;

pub use command::*;
pub use ids::RunId;
pub use policy::*;
pub use run::*;
pub use sandbox::*;
