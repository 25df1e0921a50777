//! Authoritative world model
//!
//! Owns every live cube and all simulation rules: movement, attrition,
//! absorption, splitting, spawning and uid allocation. Operations that name a
//! uid which is no longer live are treated as already resolved and do
//! nothing, since disconnects and absorptions race with queued intents.

use crate::config::WorldParams;
use crate::entity::{Cube, CubeKind, GroupId, Uid, UidAllocator};
use crate::physics::{Bounds, SpeedCurve, Vector2};
use crate::utils::{random_color, VIRUS_COLOR};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{encode_records, CubeRecord, ProtocolError};
use std::collections::{BTreeMap, BTreeSet};

/// Placement attempts before a spawn accepts overlapping a player.
const MAX_PLACEMENT_ATTEMPTS: usize = 64;

/// Targets closer than this on both axes leave the cell where it is.
const MOVE_DEAD_ZONE: f64 = 1.0;

/// Diagonal directions used when a virus throws cells away.
const VIRUS_THROW_DIRECTIONS: [(f64, f64); 4] = [(1.0, 1.0), (-1.0, -1.0), (-1.0, 1.0), (1.0, -1.0)];

/// Sibling cells produced by one player's splits.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitGroup {
    /// Uid the owning player addresses the group by.
    pub founder: Uid,
    /// Every member, founder included.
    pub members: BTreeSet<Uid>,
}

/// One cube eaten by a player during collision resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Meal {
    /// Player uid (split founder or unsplit cell) credited with the meal.
    pub owner: Uid,
    pub kind: CubeKind,
    /// Name of the eaten cube; empty for food and viruses.
    pub eaten_name: String,
}

#[derive(Debug, Default)]
pub struct CollisionReport {
    /// Cubes removed this pass, serialized with zero mass.
    pub destroyed: Vec<Cube>,
    pub meals: Vec<Meal>,
}

/// Everything one tick sends to clients.
#[derive(Debug, Default)]
pub struct TickDelta {
    pub destroyed: Vec<CubeRecord>,
    pub spawned: Vec<CubeRecord>,
    pub players: Vec<CubeRecord>,
}

impl TickDelta {
    /// Destroyed records first, then spawned ones, then every player cell.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode_records(
            self.destroyed
                .iter()
                .chain(self.spawned.iter())
                .chain(self.players.iter()),
        )
    }

    pub fn record_count(&self) -> usize {
        self.destroyed.len() + self.spawned.len() + self.players.len()
    }
}

enum Contact {
    FirstEats,
    SecondEats,
    Nothing,
}

pub struct World {
    params: WorldParams,
    bounds: Bounds,
    speed: SpeedCurve,
    /// Player cells, split siblings included.
    players: BTreeMap<Uid, Cube>,
    /// Food and viruses.
    food: BTreeMap<Uid, Cube>,
    groups: BTreeMap<GroupId, SplitGroup>,
    next_group: u32,
    uids: UidAllocator,
    rng: StdRng,
}

impl World {
    /// Creates a world seeded from entropy and fills it with food.
    pub fn new(params: WorldParams) -> Self {
        Self::with_rng(params, StdRng::from_entropy())
    }

    /// Creates a reproducible world.
    pub fn with_seed(params: WorldParams, seed: u64) -> Self {
        Self::with_rng(params, StdRng::seed_from_u64(seed))
    }

    fn with_rng(params: WorldParams, rng: StdRng) -> Self {
        let mut world = World {
            bounds: Bounds::new(params.width, params.height),
            speed: SpeedCurve::from_params(&params),
            params,
            players: BTreeMap::new(),
            food: BTreeMap::new(),
            groups: BTreeMap::new(),
            next_group: 0,
            uids: UidAllocator::new(),
            rng,
        };

        while world.food.len() < world.params.max_food_count {
            world.spawn_food_or_virus();
        }
        world
    }

    pub fn params(&self) -> &WorldParams {
        &self.params
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn food_count(&self) -> usize {
        self.food.len()
    }

    pub fn cube(&self, uid: Uid) -> Option<&Cube> {
        self.players.get(&uid).or_else(|| self.food.get(&uid))
    }

    pub fn contains_player(&self, uid: Uid) -> bool {
        self.players.contains_key(&uid)
    }

    pub fn players(&self) -> impl Iterator<Item = &Cube> {
        self.players.values()
    }

    pub fn food(&self) -> impl Iterator<Item = &Cube> {
        self.food.values()
    }

    pub fn group(&self, id: GroupId) -> Option<&SplitGroup> {
        self.groups.get(&id)
    }

    /// The split group `uid` belongs to, if any.
    pub fn group_of(&self, uid: Uid) -> Option<&SplitGroup> {
        self.players
            .get(&uid)
            .and_then(|cube| cube.group)
            .and_then(|id| self.groups.get(&id))
    }

    /// Uid of the player a cell belongs to: its group's founder, or itself.
    pub fn owner_of(&self, uid: Uid) -> Uid {
        self.group_of(uid).map_or(uid, |group| group.founder)
    }

    /// Combined mass of every cell owned by the player `uid`.
    pub fn player_mass(&self, uid: Uid) -> Option<f64> {
        let cube = self.players.get(&uid)?;
        match self.group_of(uid) {
            Some(group) if group.founder == uid => Some(
                group
                    .members
                    .iter()
                    .filter_map(|member| self.players.get(member))
                    .map(|cube| cube.mass)
                    .sum(),
            ),
            _ => Some(cube.mass),
        }
    }

    // ---------------------------------------------------------------- players

    /// Adds a new player at a free starting position.
    pub fn add_player(&mut self, name: &str) -> Cube {
        let mass = self.params.player_start_mass;
        let position = self.find_starting_position(mass.sqrt());
        let uid = self.add_player_at(name, position, mass);
        self.players[&uid].clone()
    }

    /// Adds a player cell at an explicit position, clamped into the world.
    pub fn add_player_at(&mut self, name: &str, position: Vector2, mass: f64) -> Uid {
        let uid = self.uids.allocate();
        let color = random_color(&mut self.rng);
        let position = self.bounds.clamp_center(position, mass.sqrt());
        self.players
            .insert(uid, Cube::player(uid, position, mass, color, name));
        uid
    }

    /// Removes the player `uid` and, for a split founder, all of its siblings.
    ///
    /// Returns the removed cells with zero mass, ready to be reported as
    /// destroyed.
    pub fn remove_player(&mut self, uid: Uid) -> Vec<Cube> {
        let Some(group) = self.players.get(&uid).map(|cube| cube.group) else {
            return Vec::new();
        };

        let cells: Vec<Uid> = match group {
            Some(id) if self.groups.get(&id).is_some_and(|g| g.founder == uid) => {
                let group = self.groups.remove(&id);
                group.map(|g| g.members.into_iter().collect()).unwrap_or_default()
            }
            Some(id) => {
                if let Some(group) = self.groups.get_mut(&id) {
                    group.members.remove(&uid);
                }
                self.prune_group(id);
                vec![uid]
            }
            None => vec![uid],
        };

        let mut removed = Vec::with_capacity(cells.len());
        for cell in cells {
            if let Some(mut cube) = self.players.remove(&cell) {
                self.uids.release(cell);
                cube.mass = 0.0;
                cube.group = None;
                removed.push(cube);
            }
        }
        removed
    }

    /// Every player loses a fixed share of its mass, never dropping below
    /// the starting mass.
    pub fn apply_attrition(&mut self) {
        let floor = self.params.player_start_mass;
        let keep = 1.0 - self.params.attrition_rate;
        for cube in self.players.values_mut() {
            if cube.mass > floor {
                cube.mass = (cube.mass * keep).max(floor);
            }
        }
    }

    // --------------------------------------------------------------- movement

    /// Moves the player `uid` toward `target`.
    ///
    /// A split founder moves every sibling independently and keeps siblings
    /// from sliding over one another.
    pub fn move_toward(&mut self, uid: Uid, target: Vector2) {
        let members: Vec<Uid> = match self.group_of(uid) {
            Some(group) if group.founder == uid => group.members.iter().copied().collect(),
            _ => {
                self.move_cube(uid, target);
                return;
            }
        };

        for &member in &members {
            let Some(before) = self.players.get(&member).map(|cube| cube.position) else {
                continue;
            };
            self.move_cube(member, target);

            for &sibling in &members {
                if sibling != member {
                    self.undo_sibling_overlap(member, sibling, before);
                }
            }
        }
    }

    fn move_cube(&mut self, uid: Uid, target: Vector2) {
        let Some(cube) = self.players.get_mut(&uid) else {
            return;
        };

        let offset = target.sub(&cube.position);
        if offset.x.abs() < MOVE_DEAD_ZONE && offset.y.abs() < MOVE_DEAD_ZONE {
            return;
        }

        let step = offset.normalize().scale(self.speed.speed(cube.mass));
        let step = self.bounds.constrain_step(&cube.bounds(), step);
        cube.position.x += step.x;
        cube.position.y += step.y;
    }

    /// Rolls `mover` back toward `before` if it now overlaps `sibling`.
    ///
    /// The axis along which the two were further apart before the move is
    /// the one that produced the overlap and is reverted; equal distances
    /// revert both axes.
    fn undo_sibling_overlap(&mut self, mover: Uid, sibling: Uid, before: Vector2) {
        let Some(other) = self.players.get(&sibling).map(|cube| (cube.position, cube.bounds())) else {
            return;
        };
        let (other_position, other_bounds) = other;
        let Some(cube) = self.players.get_mut(&mover) else {
            return;
        };
        if !cube.bounds().overlaps(&other_bounds) {
            return;
        }

        let gap_x = (before.x - other_position.x).abs();
        let gap_y = (before.y - other_position.y).abs();
        if gap_x > gap_y {
            cube.position.x = before.x;
        } else if gap_y > gap_x {
            cube.position.y = before.y;
        } else {
            cube.position = before;
        }
    }

    // -------------------------------------------------------------- splitting

    /// Splits every cell of `uid`'s group that is heavy enough, throwing the
    /// new halves at `target`. Returns the newly created cells.
    pub fn split(&mut self, uid: Uid, target: Vector2) -> Vec<Cube> {
        let Some((group, mass)) = self.players.get(&uid).map(|cube| (cube.group, cube.mass)) else {
            return Vec::new();
        };
        let group_id = match group {
            Some(id) => id,
            None if mass < self.params.min_split_mass => return Vec::new(),
            None => self.found_group(uid),
        };
        let Some(group) = self.groups.get(&group_id) else {
            return Vec::new();
        };

        let founder = group.founder;
        let members: Vec<Uid> = group.members.iter().copied().collect();
        let (name, color) = self
            .players
            .get(&founder)
            .or_else(|| self.players.get(&uid))
            .map(|cube| (cube.name.clone(), cube.color))
            .unwrap_or_default();

        let mut created = Vec::new();
        for member in members {
            let group_len = self.groups.get(&group_id).map_or(0, |g| g.members.len());
            let Some(cube) = self.players.get_mut(&member) else {
                if let Some(group) = self.groups.get_mut(&group_id) {
                    group.members.remove(&member);
                }
                continue;
            };
            if group_len >= self.params.max_split_count || cube.mass < self.params.min_split_mass {
                continue;
            }

            let half = cube.mass / 2.0;
            cube.mass = half;
            created.push(self.add_sibling(group_id, &name, color, target, half));
        }

        self.prune_group(group_id);
        created
    }

    /// Breaks the cell `uid` apart after it hit a virus at `contact`.
    ///
    /// The cell loses the configured overhead and keeps half of the rest;
    /// four siblings share the other half, thrown diagonally away from the
    /// contact point.
    fn virus_split(&mut self, uid: Uid, contact: Vector2) -> Vec<Cube> {
        let Some(cube) = self.players.get(&uid) else {
            return Vec::new();
        };
        let group_len = cube
            .group
            .and_then(|id| self.groups.get(&id))
            .map_or(1, |group| group.members.len());
        if group_len >= self.params.max_split_count {
            return Vec::new();
        }

        let (name, color, pre_mass, existing) =
            (cube.name.clone(), cube.color, cube.mass, cube.group);
        let group_id = match existing {
            Some(id) => id,
            None => self.found_group(uid),
        };

        let remaining = (pre_mass - self.params.virus_split_overhead).max(0.0);
        if let Some(cube) = self.players.get_mut(&uid) {
            cube.mass = remaining / 2.0;
        }

        let piece = remaining / 8.0;
        let distance = self.params.max_split_distance;
        VIRUS_THROW_DIRECTIONS
            .iter()
            .map(|&(dx, dy)| {
                let position = Vector2::new(contact.x + dx * distance, contact.y + dy * distance);
                self.add_sibling(group_id, &name, color, position, piece)
            })
            .collect()
    }

    fn found_group(&mut self, founder: Uid) -> GroupId {
        let id = GroupId(self.next_group);
        self.next_group += 1;
        self.groups.insert(
            id,
            SplitGroup {
                founder,
                members: BTreeSet::from([founder]),
            },
        );
        if let Some(cube) = self.players.get_mut(&founder) {
            cube.group = Some(id);
        }
        id
    }

    fn add_sibling(&mut self, group: GroupId, name: &str, color: i32, position: Vector2, mass: f64) -> Cube {
        let uid = self.uids.allocate();
        let position = self.bounds.clamp_center(position, mass.sqrt());
        let mut cube = Cube::player(uid, position, mass, color, name);
        cube.group = Some(group);

        if let Some(group) = self.groups.get_mut(&group) {
            group.members.insert(uid);
        }
        self.players.insert(uid, cube.clone());
        cube
    }

    /// Drops stale members and dissolves the group once only its founder is left.
    fn prune_group(&mut self, id: GroupId) {
        let Some(group) = self.groups.get_mut(&id) else {
            return;
        };
        let players = &self.players;
        group.members.retain(|member| players.contains_key(member));
        if group.members.len() > 1 {
            return;
        }

        if let Some(group) = self.groups.remove(&id) {
            for member in group.members {
                if let Some(cube) = self.players.get_mut(&member) {
                    cube.group = None;
                }
            }
        }
    }

    // ------------------------------------------------------------- collisions

    /// Resolves every contact for this tick.
    ///
    /// Players are visited in ascending uid order; each is checked against
    /// all food, then against every player with a higher uid. Equal masses
    /// never absorb each other.
    pub fn resolve_collisions(&mut self) -> CollisionReport {
        let mut report = CollisionReport::default();
        let mut retired = Vec::new();
        let order: Vec<Uid> = self.players.keys().copied().collect();

        for (index, &uid) in order.iter().enumerate() {
            if !self.players.contains_key(&uid) {
                continue;
            }
            self.eat_food(uid, &mut report, &mut retired);

            for &other in &order[index + 1..] {
                if !self.players.contains_key(&other) {
                    continue;
                }
                match self.contact(uid, other) {
                    Contact::FirstEats => self.absorb(uid, other, &mut report, &mut retired),
                    Contact::SecondEats => {
                        self.absorb(other, uid, &mut report, &mut retired);
                        break;
                    }
                    Contact::Nothing => {}
                }
            }
        }

        for uid in retired {
            self.uids.release(uid);
        }
        report
    }

    fn eat_food(&mut self, uid: Uid, report: &mut CollisionReport, retired: &mut Vec<Uid>) {
        let Some(player) = self.players.get(&uid) else {
            return;
        };
        let bounds = player.bounds();
        let touching: Vec<Uid> = self
            .food
            .values()
            .filter(|food| bounds.contains_point(food.position))
            .map(|food| food.uid)
            .collect();

        for food_uid in touching {
            let (Some(player_mass), Some(food)) = (
                self.players.get(&uid).map(|cube| cube.mass),
                self.food.get(&food_uid),
            ) else {
                continue;
            };
            if player_mass <= food.mass {
                continue;
            }

            let Some(mut food) = self.food.remove(&food_uid) else {
                continue;
            };
            if food.kind == CubeKind::Virus {
                self.virus_split(uid, food.position);
            } else if let Some(player) = self.players.get_mut(&uid) {
                player.mass += food.mass;
            }
            self.keep_inside(uid);

            report.meals.push(Meal {
                owner: self.owner_of(uid),
                kind: food.kind,
                eaten_name: String::new(),
            });
            food.mass = 0.0;
            retired.push(food_uid);
            report.destroyed.push(food);
        }
    }

    fn contact(&self, first: Uid, second: Uid) -> Contact {
        let (Some(a), Some(b)) = (self.players.get(&first), self.players.get(&second)) else {
            return Contact::Nothing;
        };
        if !(a.contains_center_of(b) || b.contains_center_of(a)) {
            return Contact::Nothing;
        }

        match (a.group, b.group) {
            (Some(ga), Some(gb)) if ga == gb => {
                let founder = self.groups.get(&ga).map(|group| group.founder);
                if founder == Some(first) {
                    Contact::FirstEats
                } else if founder == Some(second) {
                    Contact::SecondEats
                } else {
                    Contact::Nothing
                }
            }
            _ if a.mass > b.mass => Contact::FirstEats,
            _ if b.mass > a.mass => Contact::SecondEats,
            _ => Contact::Nothing,
        }
    }

    /// `eater` swallows `eaten` whole.
    ///
    /// When a split founder is eaten while siblings remain, the lowest-uid
    /// sibling takes over the founder's uid so the player stays addressable;
    /// the sibling's old uid is the one reported destroyed and retired.
    fn absorb(&mut self, eater: Uid, eaten: Uid, report: &mut CollisionReport, retired: &mut Vec<Uid>) {
        let Some(mut victim) = self.players.remove(&eaten) else {
            return;
        };
        let same_team = victim.group.is_some()
            && victim.group == self.players.get(&eater).and_then(|cube| cube.group);

        if let Some(cube) = self.players.get_mut(&eater) {
            cube.mass += victim.mass;
        }
        self.keep_inside(eater);

        let mut retiring = eaten;
        if let Some(group_id) = victim.group {
            if let Some(group) = self.groups.get_mut(&group_id) {
                group.members.remove(&eaten);
                if group.founder == eaten {
                    if let Some(heir) = group.members.iter().next().copied() {
                        group.members.remove(&heir);
                        group.members.insert(eaten);
                        if let Some(mut successor) = self.players.remove(&heir) {
                            debug!("Split founder {} eaten, sibling {} takes over", eaten, heir);
                            successor.uid = eaten;
                            self.players.insert(eaten, successor);
                        }
                        retiring = heir;
                    }
                }
            }
            self.prune_group(group_id);
        }

        if !same_team {
            report.meals.push(Meal {
                owner: self.owner_of(eater),
                kind: victim.kind,
                eaten_name: victim.name.clone(),
            });
        }

        victim.uid = retiring;
        victim.mass = 0.0;
        victim.group = None;
        retired.push(retiring);
        report.destroyed.push(victim);
    }

    /// Pulls a cell whose edges left the world back inside.
    fn keep_inside(&mut self, uid: Uid) {
        if let Some(cube) = self.players.get_mut(&uid) {
            cube.position = self.bounds.clamp_center(cube.position, cube.width());
        }
    }

    // --------------------------------------------------------------- spawning

    /// Spawns food until the target population is reached, at most
    /// `food_per_heartbeat` cubes per call. Returns the new cubes.
    pub fn replenish_food(&mut self) -> Vec<Cube> {
        let mut spawned = Vec::new();
        while self.food.len() < self.params.max_food_count
            && spawned.len() < self.params.food_per_heartbeat
        {
            spawned.push(self.spawn_food_or_virus());
        }
        spawned
    }

    /// Spawns one virus or food cube.
    pub fn spawn_food_or_virus(&mut self) -> Cube {
        let roll = self.rng.gen_range(0..100);
        if roll < self.params.virus_percent {
            let mass = self.params.virus_mass;
            let position = self.find_starting_position(mass.sqrt());
            let uid = self.add_virus_at(position);
            return self.food[&uid].clone();
        }

        let double = self.rng.gen_range(0..100) < self.params.double_food_percent;
        let mass = if double {
            self.params.food_mass * 2.0
        } else {
            self.params.food_mass
        };
        let position = self.random_position(mass.sqrt());
        let uid = self.add_food_at(position, mass);
        self.food[&uid].clone()
    }

    pub fn add_food_at(&mut self, position: Vector2, mass: f64) -> Uid {
        let uid = self.uids.allocate();
        let color = random_color(&mut self.rng);
        self.food.insert(uid, Cube::food(uid, position, mass, color));
        uid
    }

    pub fn add_virus_at(&mut self, position: Vector2) -> Uid {
        let uid = self.uids.allocate();
        self.food
            .insert(uid, Cube::virus(uid, position, self.params.virus_mass, VIRUS_COLOR));
        uid
    }

    /// Random position whose center does not fall inside any player cell.
    ///
    /// Gives up after a bounded number of attempts and accepts the last
    /// candidate.
    pub fn find_starting_position(&mut self, width: f64) -> Vector2 {
        let mut candidate = self.random_position(width);
        for _ in 1..MAX_PLACEMENT_ATTEMPTS {
            let covered = self
                .players
                .values()
                .any(|player| player.bounds().contains_point(candidate));
            if !covered {
                return candidate;
            }
            candidate = self.random_position(width);
        }
        debug!("No free position after {} attempts, accepting overlap", MAX_PLACEMENT_ATTEMPTS);
        candidate
    }

    fn random_position(&mut self, width: f64) -> Vector2 {
        let x = self.random_coordinate(width, self.bounds.width);
        let y = self.random_coordinate(width, self.bounds.height);
        Vector2::new(x, y)
    }

    fn random_coordinate(&mut self, width: f64, extent: f64) -> f64 {
        if 2.0 * width >= extent {
            extent / 2.0
        } else {
            self.rng.gen_range(width..extent - width)
        }
    }

    // ---------------------------------------------------------- serialization

    /// Records for every live cube: food first, then players.
    pub fn snapshot(&self) -> Vec<CubeRecord> {
        self.food
            .values()
            .chain(self.players.values())
            .map(Cube::to_record)
            .collect()
    }

    pub fn player_records(&self) -> Vec<CubeRecord> {
        self.players.values().map(Cube::to_record).collect()
    }
}
