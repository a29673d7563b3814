pub mod bearer;
pub mod broker;
pub mod error;
pub mod net;
pub mod routing;
pub mod sharing;
pub mod sim;
pub mod slice;
pub mod topo;

#[cfg(test)]
mod test;
