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

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod actions;
pub mod check;
pub mod context;
pub mod error;
pub mod meta;
pub mod pattern;
pub mod resolved;
pub mod result;
pub mod role;
pub mod user;

pub use self::actions::Action;
pub use self::actions::ActionScope;
pub use self::actions::Actions;
pub use self::check::CheckList;
pub use self::check::CheckTable;
pub use self::context::PrivilegesEvaluationContext;
pub use self::error::AuthzError;
pub use self::error::AuthzErrorKind;
pub use self::meta::AliasResolutionMode;
pub use self::meta::Meta;
pub use self::meta::ResourceId;
pub use self::pattern::Pattern;
pub use self::resolved::ResolvedIndices;
pub use self::result::EvaluationStatus;
pub use self::result::PrivilegesEvaluationResult;
pub use self::role::FlattenedActionGroups;
pub use self::role::Role;
pub use self::user::User;
