//! OpenFlow control-plane core for a software switch.
//!
//! The crate terminates OpenFlow sessions (1.0 through 1.2 plus Nicira
//! extensions), keeps an authoritative wildcarded flow table, mirrors the
//! datapath's ports, and drives a pluggable datapath provider. It never
//! opens sockets or forwards packets itself: the transport below and the
//! forwarding engine beneath are reached through traits.

pub mod bits;
pub mod packet;

pub mod message;
pub mod ofp_header;
pub mod ofp_message;
pub mod ofp_serialization;
pub mod ofp_utils;
pub mod openflow;
pub mod openflow0x01;
pub mod openflow0x02;
pub mod openflow0x03;

pub mod nicira;
pub mod nx_match;

pub mod classifier;
pub mod connection;
pub mod datapath;
pub mod handler;
pub mod pktbuf;
pub mod port_table;
pub mod rate_limit;
pub mod rule;
pub mod switch;
