//! In-memory model for LDAP entries, attributes and modifications.
//!
//! Attribute descriptions compare case-insensitively; attribute values are
//! raw byte buffers compared by exact equality. The order of values inside
//! an attribute is preserved but carries no meaning for comparisons.

/// An LDAP entry: a distinguished name plus its attributes.
///
/// Each attribute description occurs at most once; repeated descriptions
/// seen during parsing are merged by concatenating their value lists.
#[derive(Debug, Clone)]
pub struct Entry {
    pub dn: String,
    pub attributes: Vec<Attribute>,
}

/// An attribute description paired with an ordered list of values.
/// Duplicate values are permitted.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub ad: String,
    pub values: Vec<Vec<u8>>,
}

/// LDAP modification operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
}

/// One modification: operation, attribute description, values.
///
/// A `Delete` with no values removes the whole attribute.
#[derive(Debug, Clone)]
pub struct Mod {
    pub op: ModOp,
    pub ad: String,
    pub values: Vec<Vec<u8>>,
}

/// A parsed modify record.
#[derive(Debug, Clone)]
pub struct Modify {
    pub dn: String,
    pub mods: Vec<Mod>,
}

/// A parsed rename (modrdn) record.
#[derive(Debug, Clone)]
pub struct Rename {
    pub old_dn: String,
    pub new_dn: String,
    pub delete_old_rdn: bool,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Entry {
        Entry {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    /// Look up an attribute by description, case-insensitively.
    pub fn attribute(&self, ad: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.ad.eq_ignore_ascii_case(ad))
    }

    pub fn attribute_mut(&mut self, ad: &str) -> Option<&mut Attribute> {
        self.attributes
            .iter_mut()
            .find(|a| a.ad.eq_ignore_ascii_case(ad))
    }

    /// Look up an attribute, creating an empty one if missing.
    pub fn ensure_attribute(&mut self, ad: &str) -> &mut Attribute {
        let pos = self
            .attributes
            .iter()
            .position(|a| a.ad.eq_ignore_ascii_case(ad));
        match pos {
            Some(i) => &mut self.attributes[i],
            None => {
                self.attributes.push(Attribute::new(ad));
                self.attributes.last_mut().unwrap()
            }
        }
    }

    /// One `Add` modification per attribute, in document order, each
    /// carrying the attribute's full value list.
    pub fn to_mods(&self) -> Vec<Mod> {
        self.attributes
            .iter()
            .map(|a| a.to_mod(ModOp::Add))
            .collect()
    }

    /// Like [`Entry::to_mods`], but with `Replace` operations.
    pub fn to_replace_mods(&self) -> Vec<Mod> {
        self.attributes
            .iter()
            .map(|a| a.to_mod(ModOp::Replace))
            .collect()
    }
}

impl Attribute {
    pub fn new(ad: impl Into<String>) -> Attribute {
        Attribute {
            ad: ad.into(),
            values: Vec::new(),
        }
    }

    pub fn append_value(&mut self, data: &[u8]) {
        self.values.push(data.to_vec());
    }

    /// Index of the first value equal to `data`, by exact byte comparison.
    pub fn find_value(&self, data: &[u8]) -> Option<usize> {
        self.values.iter().position(|v| v.as_slice() == data)
    }

    pub fn contains_value(&self, data: &[u8]) -> bool {
        self.find_value(data).is_some()
    }

    /// Remove one occurrence of `data`. Returns false if absent.
    pub fn remove_value(&mut self, data: &[u8]) -> bool {
        match self.find_value(data) {
            Some(i) => {
                self.values.remove(i);
                true
            }
            None => false,
        }
    }

    /// Value multiset equality: same values with the same multiplicities,
    /// in any order.
    pub fn same_values(&self, other: &Attribute) -> bool {
        if self.values.len() != other.values.len() {
            return false;
        }
        multiset_difference(&self.values, &other.values).is_empty()
    }

    pub fn to_mod(&self, op: ModOp) -> Mod {
        Mod {
            op,
            ad: self.ad.clone(),
            values: self.values.clone(),
        }
    }
}

/// The multiset `a \ b`: every value of `a` that has no unconsumed match
/// in `b`, respecting multiplicities.
pub fn multiset_difference(a: &[Vec<u8>], b: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut consumed = vec![false; b.len()];
    let mut rest = Vec::new();
    for value in a {
        let slot = b
            .iter()
            .enumerate()
            .position(|(i, w)| !consumed[i] && w == value);
        match slot {
            Some(i) => consumed[i] = true,
            None => rest.push(value.clone()),
        }
    }
    rest
}
