//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Client error types

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connecting took longer than the configured timeout
    #[error("Connection timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// Nothing arrived within the configured read timeout
    #[error("Read timeout after {0:?}")]
    ReadTimeout(Duration),

    /// The connection has already ended
    #[error("Connection closed")]
    Closed,

    /// Message is empty or is the lone disconnect byte
    #[error("Message is reserved or empty")]
    ReservedMessage,
}

impl ClientError {
    /// Check if the connection is unusable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Io(_) | ClientError::Closed)
    }
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
