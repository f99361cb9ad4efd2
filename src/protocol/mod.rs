//! Wire formats shared by nodes
//!
//! JSON frames on the `/ws` channel, the identity document served at `GET /`,
//! and the UDP discovery payload.

mod messages;

pub use messages::*;
