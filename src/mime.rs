// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Best-effort content-type detection for file-sourced uploads.

use std::path::Path;

/// The content type used when the file extension is unrecognized.
pub const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

/// Returns the best-guess content type for a file path.
///
/// The lookup table is process-wide, immutable state; only the file
/// extension participates in the guess. Unrecognized or missing extensions
/// yield [DEFAULT_CONTENT_TYPE].
///
/// # Example
/// ```
/// use ks3_client::mime::content_type_for;
/// assert_eq!(content_type_for("photo.png"), "image/png");
/// assert_eq!(content_type_for("no-extension"), "binary/octet-stream");
/// ```
pub fn content_type_for<P: AsRef<Path>>(path: P) -> String {
    mime_guess::from_path(path.as_ref())
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}
