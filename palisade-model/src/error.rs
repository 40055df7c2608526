/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Authorization errors.

use std::error::Error;
use std::fmt;

/// Cause of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzErrorKind {
    /// General failure. See message for details.
    Unspecified,
    /// A permission or resource pattern failed to compile.
    InvalidPattern,
    /// A dynamic pattern template or date math expression failed to render.
    ExpressionEvaluation,
    /// The evaluator was used before it was initialized.
    NotInitialized,
}

impl AuthzErrorKind {
    /// Create a new instance with an error message.
    pub fn error_with_msg<S: AsRef<str>>(self, msg: S) -> AuthzError {
        AuthzError {
            kind: self,
            msg: Some(msg.as_ref().to_string()),
        }
    }

    /// Create a new instance without an error message.
    pub fn error(self) -> AuthzError {
        AuthzError {
            kind: self,
            msg: None,
        }
    }
}

impl fmt::Display for AuthzErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/** Authorization error.

Create a new instance via [AuthzErrorKind].
*/
#[derive(Debug, Clone)]
pub struct AuthzError {
    kind: AuthzErrorKind,
    msg: Option<String>,
}

impl AuthzError {
    /// Return the type of error.
    pub fn kind(&self) -> &AuthzErrorKind {
        &self.kind
    }
}

impl fmt::Display for AuthzError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(msg) = &self.msg {
            write!(f, "{} {}", self.kind, msg)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl AsRef<AuthzError> for AuthzError {
    fn as_ref(&self) -> &AuthzError {
        self
    }
}

impl Error for AuthzError {}
