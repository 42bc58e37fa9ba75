// SPDX-License-Identifier: Apache-2.0

use rustls::crypto::CryptoProvider;
use std::error::Error;

pub fn init_crypto_provider() -> Result<(), Box<dyn Error + Send + Sync>> {
    if CryptoProvider::get_default().is_none() {
        return match rustls::crypto::aws_lc_rs::default_provider().install_default() {
            Ok(_) => Ok(()),
            // another thread may have won the race to install
            Err(_) if CryptoProvider::get_default().is_some() => Ok(()),
            Err(e) => Err(format!("failed to initialize crypto library: {:?}", e).into()),
        };
    }
    Ok(())
}
