//! Best-effort extraction of zip code and neighborhood from free-text addresses.
//!
//! Addresses look like `"125 Elm St, Jamaica Plain, MA 02130"`. Anything that
//! does not match yields empty strings, never an error.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ZIP_RE: Regex = Regex::new(r"MA\s+(\d{5})").unwrap();
    static ref NEIGHBORHOOD_RE: Regex = Regex::new(r"([A-Za-z\s]+),\s+MA").unwrap();
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressParts {
    pub zip_code: String,
    pub neighborhood: String,
}

pub fn parse_address(address: &str) -> AddressParts {
    let zip_code = ZIP_RE
        .captures(address)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    let neighborhood = NEIGHBORHOOD_RE
        .captures(address)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    AddressParts {
        zip_code,
        neighborhood,
    }
}
