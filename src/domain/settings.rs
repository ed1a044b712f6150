use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Per-subscriber options. A subscriber without a stored row gets the default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberSettings {
    pub prefix_tags: String,
    pub popular_digest_opt_in: bool,
}

/// Tags a subscriber never wants to see.
pub type Blacklist = BTreeSet<String>;
