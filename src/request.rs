use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Width serial numbers are zero-padded to.
pub const SERIAL_WIDTH: usize = 10;

/// Parameters identifying the device a certificate is issued for.
///
/// # Fields
/// * `manufacturer_code` - Two-letter manufacturer code, fixed for the integration.
/// * `model_code` - Device model, one of the configured closed set.
/// * `serial_number` - 1 to 10 decimal digits, rendered zero-padded to 10.
/// * `tax_id` - CUIT of the taxpayer the device is registered to.
#[derive(Clone, Debug, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
pub struct CertificateRequest {
    pub manufacturer_code: String,
    pub model_code: String,
    pub serial_number: String,
    pub tax_id: String,
}

/// The closed set of codes a request is checked against.
#[derive(Clone, Debug, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
pub struct DevicePolicy {
    #[serde(default = "default_manufacturer_code")]
    #[builder(default = default_manufacturer_code())]
    pub manufacturer_code: String,
    #[serde(default = "default_model_codes")]
    #[builder(default = default_model_codes())]
    pub model_codes: Vec<String>,
}

fn default_manufacturer_code() -> String {
    "SH".to_string()
}

fn default_model_codes() -> Vec<String> {
    ["IA", "IB", "PT"].iter().map(|s| s.to_string()).collect()
}

impl Default for DevicePolicy {
    fn default() -> Self {
        Self {
            manufacturer_code: default_manufacturer_code(),
            model_codes: default_model_codes(),
        }
    }
}

impl CertificateRequest {
    /// Checks every invariant. Called before any network traffic.
    pub fn validate(&self, policy: &DevicePolicy) -> Result<(), ValidationError> {
        if self.manufacturer_code != policy.manufacturer_code {
            return Err(ValidationError::ManufacturerMismatch {
                expected: policy.manufacturer_code.clone(),
                actual: self.manufacturer_code.clone(),
            });
        }
        if !policy.model_codes.iter().any(|m| *m == self.model_code) {
            return Err(ValidationError::UnknownModel(self.model_code.clone()));
        }
        if !is_valid_serial(&self.serial_number) {
            return Err(ValidationError::InvalidSerial(self.serial_number.clone()));
        }
        if !is_valid_cuit(&self.tax_id) {
            return Err(ValidationError::InvalidTaxId(self.tax_id.clone()));
        }
        Ok(())
    }

    /// Serial number left-padded with zeros to [`SERIAL_WIDTH`].
    pub fn padded_serial(&self) -> String {
        format!("{:0>width$}", self.serial_number, width = SERIAL_WIDTH)
    }
}

fn is_valid_serial(serial: &str) -> bool {
    (1..=SERIAL_WIDTH).contains(&serial.len()) && serial.bytes().all(|b| b.is_ascii_digit())
}

/// Checks an 11-digit CUIT against its mod-11 verifier digit.
pub fn is_valid_cuit(cuit: &str) -> bool {
    const WEIGHTS: [u32; 10] = [5, 4, 3, 2, 7, 6, 5, 4, 3, 2];

    let digits: Vec<u32> = cuit.chars().filter_map(|c| c.to_digit(10)).collect();
    if cuit.len() != 11 || digits.len() != 11 {
        return false;
    }

    let sum: u32 = digits.iter().zip(WEIGHTS).map(|(d, w)| d * w).sum();
    let check = match 11 - sum % 11 {
        11 => 0,
        10 => return false,
        n => n,
    };
    digits[10] == check
}
