use crate::physics::{Rect, Vector2};
use shared::CubeRecord;
use std::fmt;

/// Identity of a live cube. Unique among live cubes, reused after retirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub u32);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a split group, allocated independently of cube uids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeKind {
    Player,
    Food,
    Virus,
}

// Cube representation
#[derive(Debug, Clone, PartialEq)]
pub struct Cube {
    pub uid: Uid,
    /// Center of the cube.
    pub position: Vector2,
    pub mass: f64,
    pub color: i32,
    pub name: String,
    pub kind: CubeKind,
    /// Split group this cell belongs to, if its player has split.
    pub group: Option<GroupId>,
}

impl Cube {
    pub fn player(uid: Uid, position: Vector2, mass: f64, color: i32, name: &str) -> Self {
        Cube {
            uid,
            position,
            mass,
            color,
            name: name.to_string(),
            kind: CubeKind::Player,
            group: None,
        }
    }

    pub fn food(uid: Uid, position: Vector2, mass: f64, color: i32) -> Self {
        Cube {
            uid,
            position,
            mass,
            color,
            name: String::new(),
            kind: CubeKind::Food,
            group: None,
        }
    }

    pub fn virus(uid: Uid, position: Vector2, mass: f64, color: i32) -> Self {
        Cube {
            kind: CubeKind::Virus,
            ..Cube::food(uid, position, mass, color)
        }
    }

    /// Side length, always derived from the mass.
    pub fn width(&self) -> f64 {
        self.mass.max(0.0).sqrt()
    }

    pub fn bounds(&self) -> Rect {
        Rect::around(self.position, self.width())
    }

    pub fn is_food(&self) -> bool {
        self.kind != CubeKind::Player
    }

    /// A cell is in contact with `other` when the other's center lies inside it.
    pub fn contains_center_of(&self, other: &Cube) -> bool {
        self.bounds().contains_point(other.position)
    }

    pub fn to_record(&self) -> CubeRecord {
        CubeRecord {
            x: self.position.x,
            y: self.position.y,
            color: self.color,
            uid: self.uid.0,
            is_food: self.is_food(),
            name: self.name.clone(),
            mass: self.mass,
        }
    }
}

/// Hands out uids, preferring recently retired ones.
#[derive(Debug, Default)]
pub struct UidAllocator {
    next: u32,
    retired: Vec<u32>,
}

impl UidAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> Uid {
        if let Some(uid) = self.retired.pop() {
            return Uid(uid);
        }
        let uid = self.next;
        self.next += 1;
        Uid(uid)
    }

    /// Returns a uid to the pool. The caller must already have removed its cube.
    pub fn release(&mut self, uid: Uid) {
        debug_assert!(!self.retired.contains(&uid.0), "uid {} released twice", uid);
        self.retired.push(uid.0);
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_width_tracks_mass() {
        let mut cube = Cube::player(Uid(1), Vector2::new(50.0, 50.0), 16.0, 0, "a");
        assert_approx_eq!(cube.width(), 4.0);

        cube.mass = 25.0;
        assert_approx_eq!(cube.width(), 5.0);
        assert_approx_eq!(cube.bounds().left, 47.5);
        assert_approx_eq!(cube.bounds().bottom, 52.5);
    }

    #[test]
    fn test_contact_is_center_inside_box() {
        let big = Cube::player(Uid(1), Vector2::new(50.0, 50.0), 100.0, 0, "big");
        let near = Cube::food(Uid(2), Vector2::new(54.0, 46.0), 1.0, 0);
        let far = Cube::food(Uid(3), Vector2::new(56.0, 50.0), 1.0, 0);

        assert!(big.contains_center_of(&near));
        assert!(!big.contains_center_of(&far));
        assert!(!near.contains_center_of(&big));
    }

    #[test]
    fn test_record_flags_food_and_virus() {
        let virus = Cube::virus(Uid(9), Vector2::new(1.0, 2.0), 30.0, 7);
        let record = virus.to_record();
        assert!(record.is_food);
        assert_eq!(record.uid, 9);
        assert!(record.name.is_empty());

        let player = Cube::player(Uid(3), Vector2::new(1.0, 2.0), 10.0, 7, "p");
        assert!(!player.to_record().is_food);
    }

    #[test]
    fn test_allocator_counts_up() {
        let mut uids = UidAllocator::new();
        assert_eq!(uids.allocate(), Uid(0));
        assert_eq!(uids.allocate(), Uid(1));
        assert_eq!(uids.allocate(), Uid(2));
    }

    #[test]
    fn test_allocator_prefers_retired() {
        let mut uids = UidAllocator::new();
        let a = uids.allocate();
        let b = uids.allocate();
        uids.release(a);
        uids.release(b);

        assert_eq!(uids.retired_count(), 2);
        assert_eq!(uids.allocate(), b);
        assert_eq!(uids.allocate(), a);
        assert_eq!(uids.allocate(), Uid(2));
    }
}
