use crate::Id;
use std::collections::{HashMap, HashSet};

/// HashMap-based name generator that hands out fresh names for each prefix.
/// Used for SSA versions, temporaries, unrolled copies and signal names.
#[derive(Clone, Debug, Default)]
pub struct NameGenerator {
    name_hash: HashMap<Id, i64>,
    generated_names: HashSet<Id>,
}

impl NameGenerator {
    /// Create a NameGenerator that will never generate any of `names`.
    pub fn with_prev_defined_names(names: HashSet<Id>) -> Self {
        NameGenerator {
            generated_names: names,
            name_hash: HashMap::default(),
        }
    }

    /// Mark `names` as taken.
    pub fn add_names<I: IntoIterator<Item = Id>>(&mut self, names: I) {
        self.generated_names.extend(names)
    }

    /// Returns a new name that starts with `prefix`.
    /// ```
    /// # use polyphony_utils::NameGenerator;
    /// let mut namegen = NameGenerator::default();
    /// assert_eq!(namegen.gen_name("t"), "t");
    /// assert_eq!(namegen.gen_name("t"), "t0");
    /// ```
    pub fn gen_name<S>(&mut self, prefix: S) -> Id
    where
        S: Into<Id>,
    {
        let mut cur_prefix: Id = prefix.into();
        loop {
            let count = self
                .name_hash
                .entry(cur_prefix)
                .and_modify(|v| *v += 1)
                .or_insert(-1);

            let name = if *count == -1 {
                cur_prefix
            } else {
                Id::from(cur_prefix.to_string() + &count.to_string())
            };

            if !self.generated_names.contains(&name) {
                self.generated_names.insert(name);
                return name;
            }

            // Already taken; extend the prefix with the colliding name.
            cur_prefix = name;
        }
    }

    /// Returns `prefix` followed by a separator and a fresh counter, always
    /// suffixed. `gen_suffixed("x", '#')` yields `x#1`, `x#2`, ...
    pub fn gen_suffixed(&mut self, prefix: &str, sep: char) -> Id {
        let key = Id::from(format!("{prefix}{sep}"));
        loop {
            let count = self.name_hash.entry(key).or_insert(0);
            *count += 1;
            let name = Id::from(format!("{prefix}{sep}{count}"));
            if self.generated_names.insert(name) {
                return name;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn avoids_predefined_names() {
        let mut namegen = NameGenerator::with_prev_defined_names(
            [Id::from("t"), Id::from("t0")].into_iter().collect(),
        );
        let a = namegen.gen_name("t");
        let b = namegen.gen_name("t");
        assert_ne!(a, b);
        assert!(a != "t" && a != "t0");
    }

    #[test]
    fn suffixed_names_count_from_one() {
        let mut namegen = NameGenerator::default();
        assert_eq!(namegen.gen_suffixed("x", '#'), "x#1");
        assert_eq!(namegen.gen_suffixed("x", '#'), "x#2");
        assert_eq!(namegen.gen_suffixed("y", '#'), "y#1");
    }

    proptest! {
        #[test]
        fn generated_names_are_unique(prefixes in prop::collection::vec("[a-c]{1,2}", 1..40)) {
            let mut namegen = NameGenerator::default();
            let mut seen = HashSet::new();
            for p in prefixes {
                let name = namegen.gen_name(p.as_str());
                prop_assert!(name.as_str().starts_with(p.as_str()));
                prop_assert!(seen.insert(name));
            }
        }
    }
}
