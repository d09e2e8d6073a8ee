//! Engine configuration: the input interface set, the output interface, and
//! optional DNS64 parameters.
//!
//! Configuration is immutable once built. [`Proxy::init`](crate::Proxy::init)
//! publishes a fresh [`ProxyConfig`] snapshot atomically and
//! [`Proxy::terminate`](crate::Proxy::terminate) withdraws it; each callback
//! loads one snapshot and never observes a torn update.

use crate::dns64::{Dns64Config, Nat64Prefix};
use crate::resolver::InterfaceIndex;
use log::{error, info, warn};

/// Capacity of the input interface list.
pub const MAX_INPUT_INTERFACES: usize = 5;

/// Raw DNS64 parameters as handed to `init`, before validation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Dns64Params {
    /// Leading bytes of the NAT64 prefix; `prefix_bits / 8` bytes are used.
    pub prefix: [u8; 16],

    /// Prefix length in bits; must be one of 32, 40, 48, 56, 64 or 96.
    pub prefix_bits: u8,

    pub force_aaaa_synthesis: bool,
}

/// One installed configuration snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct ProxyConfig {
    input_interfaces: [InterfaceIndex; MAX_INPUT_INTERFACES],
    pub output_interface: InterfaceIndex,
    pub dns64: Option<Dns64Config>,
}

impl ProxyConfig {
    /// Builds a snapshot from an interface list and optional DNS64
    /// parameters.
    ///
    /// Input interfaces beyond [`MAX_INPUT_INTERFACES`] are dropped with a
    /// warning. DNS64 parameters with an undefined prefix length disable
    /// DNS64 entirely (the force flag does not survive either).
    pub fn new(
        inputs: &[InterfaceIndex],
        output: InterfaceIndex,
        dns64: Option<Dns64Params>,
    ) -> ProxyConfig {
        let mut input_interfaces = [InterfaceIndex(0); MAX_INPUT_INTERFACES];
        if inputs.len() > MAX_INPUT_INTERFACES {
            warn!(
                "{} input interfaces given, keeping the first {}",
                inputs.len(),
                MAX_INPUT_INTERFACES
            );
        }
        for (slot, iface) in input_interfaces.iter_mut().zip(inputs) {
            *slot = *iface;
        }

        let dns64 = dns64.and_then(|params| {
            match Nat64Prefix::new(&params.prefix, params.prefix_bits) {
                Some(prefix) => {
                    info!(
                        "DNS64 enabled with prefix {:?}{}",
                        prefix,
                        if params.force_aaaa_synthesis {
                            " (force AAAA synthesis)"
                        } else {
                            ""
                        }
                    );
                    Some(Dns64Config {
                        prefix,
                        force_aaaa_synthesis: params.force_aaaa_synthesis,
                    })
                }
                None => {
                    error!(
                        "DNS64 disabled: invalid prefix length /{}",
                        params.prefix_bits
                    );
                    None
                }
            }
        });

        ProxyConfig {
            input_interfaces,
            output_interface: output,
            dns64,
        }
    }

    /// Whether a datagram arriving on `iface` is admitted. Index zero never
    /// is, whatever the configured list says.
    pub fn admits(&self, iface: InterfaceIndex) -> bool {
        iface.0 != 0 && self.input_interfaces.contains(&iface)
    }

    pub fn input_interfaces(&self) -> &[InterfaceIndex] {
        &self.input_interfaces
    }
}
