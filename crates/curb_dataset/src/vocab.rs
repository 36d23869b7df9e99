//! Closed vocabularies for class labels and scene types.

use serde::{Deserialize, Serialize};

/// Detection classes. Lookup is by lower-cased, trimmed name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Curb,
}

impl Label {
    pub const ALL: [Label; 1] = [Label::Curb];

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|l| l.name() == name)
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Label::Curb => "curb",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn count() -> usize {
        Self::ALL.len()
    }
}

/// Scene context attached to each annotated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scene {
    ContinuouslyVisible,
    Intersection,
    Obstacle,
}

impl Scene {
    pub const ALL: [Scene; 3] = [
        Scene::ContinuouslyVisible,
        Scene::Intersection,
        Scene::Obstacle,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scene::ContinuouslyVisible => "continuously_visible",
            Scene::Intersection => "intersection",
            Scene::Obstacle => "obstacle",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn count() -> usize {
        Self::ALL.len()
    }
}

impl std::fmt::Display for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_case_insensitively() {
        assert_eq!(Label::from_name(" Curb "), Some(Label::Curb));
        assert_eq!(Scene::from_name("INTERSECTION"), Some(Scene::Intersection));
        assert_eq!(Scene::from_name("crosswalk"), None);
        assert_eq!(Label::from_name("car"), None);
    }

    #[test]
    fn indices_follow_declaration_order() {
        for (i, scene) in Scene::ALL.iter().enumerate() {
            assert_eq!(scene.index(), i);
            assert_eq!(Scene::from_index(i), Some(*scene));
        }
        assert_eq!(Scene::from_index(3), None);
        assert_eq!(Label::Curb.index(), 0);
    }
}
