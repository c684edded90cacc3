// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Affine channel-pair transforms: each channel carries a
3-coefficient map `a0 + a1*y + a2*x` to and from channel 0's frame. Channel
0's own transform is the identity in both directions.
*/

use serde::{Deserialize, Serialize};

/// One `a0 + a1*y + a2*x` coefficient triple. Callers supply `(y, x)` in
/// that order, not the more common `(x, y)` -- this mirrors how these
/// per-channel mapping tables are conventionally laid out upstream, and this
/// crate keeps that ordering rather than silently reinterpreting it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct AffineMap {
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
}

impl AffineMap {
    pub const IDENTITY_X: AffineMap = AffineMap { a0: 0.0, a1: 0.0, a2: 1.0 };
    pub const IDENTITY_Y: AffineMap = AffineMap { a0: 0.0, a1: 1.0, a2: 0.0 };

    /// Full affine application, used for mapping absolute positions between
    /// channels.
    pub fn apply(&self, y: f64, x: f64) -> f64 {
        self.a0 + self.a1 * y + self.a2 * x
    }

    /// Linear-only application (no translation), used for mapping a
    /// *delta* between channel frames:
    /// a displacement vector has no absolute position, so the constant
    /// offset term does not apply to it.
    pub fn apply_linear(&self, y: f64, x: f64) -> f64 {
        self.a1 * y + self.a2 * x
    }
}

/// The four affine maps relating one channel to channel 0. Channel 0's own entry is the
/// identity in both directions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChannelTransform {
    pub x_0_to_n: AffineMap,
    pub y_0_to_n: AffineMap,
    pub x_n_to_0: AffineMap,
    pub y_n_to_0: AffineMap,
}

impl ChannelTransform {
    /// Per §4.5's literal `(yt_0toN, xt_0toN)` consuming order (Open
    /// Question #3 in `DESIGN.md`), a new x comes from the `y_*` field and a
    /// new y from the `x_*` field -- so an identity mapping stores the
    /// "extracts x" coefficients under `y_0_to_n`/`y_n_to_0` and the
    /// "extracts y" coefficients under `x_0_to_n`/`x_n_to_0`.
    pub fn identity() -> Self {
        Self {
            x_0_to_n: AffineMap::IDENTITY_Y,
            y_0_to_n: AffineMap::IDENTITY_X,
            x_n_to_0: AffineMap::IDENTITY_Y,
            y_n_to_0: AffineMap::IDENTITY_X,
        }
    }
}
