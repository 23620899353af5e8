// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! VNC Authentication (security type 2).
//!
//! Implements the classic DES challenge-response exchange: the server sends
//! a random 16-byte challenge, the client encrypts it with a key derived
//! from the password, and the server verifies the result.
//!
//! The key derivation carries VNC's historical quirk: the password is
//! truncated or zero-padded to 8 bytes and then every byte has its bit
//! order reversed before being used as the DES key. This must be preserved
//! bit-for-bit for interoperability with existing viewers.

use des::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use des::Des;
use rand::Rng;

/// Handles the VNC Authentication challenge-response exchange for one session.
pub struct VncAuth {
    password: Option<String>,
}

impl VncAuth {
    /// Creates an authenticator bound to the password snapshot taken when
    /// the client connected. `None` means no authentication is possible and
    /// every response is rejected.
    pub fn new(password: Option<String>) -> Self {
        Self { password }
    }

    /// Generates a fresh 16-byte random challenge.
    pub fn generate_challenge(&self) -> [u8; 16] {
        let mut challenge = [0u8; 16];
        rand::thread_rng().fill(&mut challenge[..]);
        challenge
    }

    /// Computes the ciphertext a correct client would return for `challenge`.
    ///
    /// The challenge is encrypted as two independent 8-byte DES-ECB blocks
    /// under the prepared key. Returns `None` when no password is set.
    pub fn expected_response(&self, challenge: &[u8; 16]) -> Option<[u8; 16]> {
        let password = self.password.as_deref()?;
        let key = prepare_key(password);

        let cipher = Des::new_from_slice(&key).expect("DES key is always 8 bytes");

        let mut expected = *challenge;
        let (first, second) = expected.split_at_mut(8);
        cipher.encrypt_block(GenericArray::from_mut_slice(first));
        cipher.encrypt_block(GenericArray::from_mut_slice(second));
        Some(expected)
    }

    /// Verifies the client's 16-byte response against the challenge.
    ///
    /// The comparison runs in constant time over the full response so the
    /// match position leaks nothing.
    pub fn verify_response(&self, response: &[u8], challenge: &[u8; 16]) -> bool {
        let Some(expected) = self.expected_response(challenge) else {
            return false;
        };
        if response.len() != expected.len() {
            return false;
        }

        let mut diff = 0u8;
        for (a, b) in expected.iter().zip(response) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

/// Derives the 8-byte DES key from a password.
///
/// Takes up to 8 bytes of the UTF-8 password (truncating longer ones,
/// zero-padding shorter ones), then reverses the bit order of each byte.
fn prepare_key(password: &str) -> [u8; 8] {
    let mut key = [0u8; 8];
    for (slot, &byte) in key.iter_mut().zip(password.as_bytes().iter().take(8)) {
        *slot = byte.reverse_bits();
    }
    key
}
