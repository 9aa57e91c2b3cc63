//! Read-only network model consumed by the kinetics compiler.
//!
//! Places and transitions are interned into [`IndexVec`]s when they are added,
//! so every later stage works with dense `PlaceId`/`TransitionId` handles
//! instead of hashing names. Arcs keep the raw endpoint names they were
//! declared with; resolving them (and rejecting dangling endpoints) is the
//! compiler's job.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier types that can index into an [`IndexVec`].
pub trait Idx: Copy + Eq + Ord + fmt::Debug {
    fn index(self) -> usize;
    fn from_usize(idx: usize) -> Self;
}

macro_rules! define_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, stringify!($name))?;
                f.debug_tuple("").field(&self.0).finish()
            }
        }

        impl Idx for $name {
            fn index(self) -> usize {
                self.0 as usize
            }

            fn from_usize(idx: usize) -> Self {
                Self(idx as u32)
            }
        }
    };
}

define_id!(PlaceId);
define_id!(TransitionId);

/// A vector indexed by strongly typed identifiers.
#[derive(Clone, PartialEq)]
pub struct IndexVec<I, T> {
    data: Vec<T>,
    _marker: PhantomData<I>,
}

impl<I: Idx, T> IndexVec<I, T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn push(&mut self, value: T) -> I {
        let idx = self.data.len();
        self.data.push(value);
        I::from_usize(idx)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }
}

impl<I: Idx, T> Default for IndexVec<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Idx, T: fmt::Debug> fmt::Debug for IndexVec<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.data.iter()).finish()
    }
}

impl<I: Idx, T> Index<I> for IndexVec<I, T> {
    type Output = T;

    fn index(&self, index: I) -> &Self::Output {
        &self.data[index.index()]
    }
}

impl<I: Idx, T> IndexMut<I> for IndexVec<I, T> {
    fn index_mut(&mut self, index: I) -> &mut Self::Output {
        &mut self.data[index.index()]
    }
}

/// A node holding a nonnegative token quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    #[serde(default)]
    pub initial: f64,
    #[serde(default)]
    pub capacity: Option<f64>,
}

/// An event that consumes from input places and produces into output places.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Arc multiplicity: a plain scalar, or one weight per token colour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArcWeight {
    Scalar(f64),
    Colored(Vec<f64>),
}

impl ArcWeight {
    /// Collapses the weight to the scalar used by the ODE (sum of colours).
    pub fn weight_sum(&self) -> f64 {
        match self {
            ArcWeight::Scalar(w) => *w,
            ArcWeight::Colored(ws) => ws.iter().sum(),
        }
    }
}

impl Default for ArcWeight {
    fn default() -> Self {
        ArcWeight::Scalar(1.0)
    }
}

impl From<f64> for ArcWeight {
    fn from(value: f64) -> Self {
        ArcWeight::Scalar(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arc {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub weight: ArcWeight,
    #[serde(default)]
    pub inhibit: bool,
}

/// Handle to either kind of node, as resolved from a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Place(PlaceId),
    Transition(TransitionId),
}

/// Place/transition network with interned node handles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "NetworkDef", into = "NetworkDef")]
pub struct Network {
    places: IndexVec<PlaceId, Place>,
    transitions: IndexVec<TransitionId, Transition>,
    arcs: Vec<Arc>,
    nodes: HashMap<String, NodeRef>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_place(
        &mut self,
        id: impl Into<String>,
        initial: f64,
        capacity: Option<f64>,
    ) -> Result<PlaceId> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(Error::DuplicateNode(id));
        }
        let handle = self.places.push(Place {
            id: id.clone(),
            initial,
            capacity,
        });
        self.nodes.insert(id, NodeRef::Place(handle));
        Ok(handle)
    }

    pub fn add_transition(&mut self, id: impl Into<String>) -> Result<TransitionId> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(Error::DuplicateNode(id));
        }
        let handle = self.transitions.push(Transition {
            id: id.clone(),
            label: None,
        });
        self.nodes.insert(id, NodeRef::Transition(handle));
        Ok(handle)
    }

    /// Adds a consuming/producing arc. Endpoints are checked at compile time.
    pub fn add_arc(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        weight: impl Into<ArcWeight>,
    ) -> &mut Self {
        self.arcs.push(Arc {
            source: source.into(),
            target: target.into(),
            weight: weight.into(),
            inhibit: false,
        });
        self
    }

    pub fn add_inhibitor_arc(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        weight: impl Into<ArcWeight>,
    ) -> &mut Self {
        self.arcs.push(Arc {
            source: source.into(),
            target: target.into(),
            weight: weight.into(),
            inhibit: true,
        });
        self
    }

    pub fn node(&self, name: &str) -> Option<NodeRef> {
        self.nodes.get(name).copied()
    }

    pub fn place_id(&self, name: &str) -> Option<PlaceId> {
        match self.node(name)? {
            NodeRef::Place(id) => Some(id),
            NodeRef::Transition(_) => None,
        }
    }

    pub fn transition_id(&self, name: &str) -> Option<TransitionId> {
        match self.node(name)? {
            NodeRef::Transition(id) => Some(id),
            NodeRef::Place(_) => None,
        }
    }

    pub fn places(&self) -> &IndexVec<PlaceId, Place> {
        &self.places
    }

    pub fn transitions(&self) -> &IndexVec<TransitionId, Transition> {
        &self.transitions
    }

    pub fn arcs(&self) -> &[Arc] {
        &self.arcs
    }
}

/// Serialized form of a [`Network`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDef {
    #[serde(default)]
    pub places: Vec<Place>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub arcs: Vec<Arc>,
}

impl TryFrom<NetworkDef> for Network {
    type Error = Error;

    fn try_from(def: NetworkDef) -> Result<Self> {
        let mut net = Network::new();
        for place in def.places {
            net.add_place(place.id, place.initial, place.capacity)?;
        }
        for transition in def.transitions {
            let handle = net.add_transition(transition.id)?;
            net.transitions[handle].label = transition.label;
        }
        net.arcs = def.arcs;
        Ok(net)
    }
}

impl From<Network> for NetworkDef {
    fn from(net: Network) -> Self {
        NetworkDef {
            places: net.places.data,
            transitions: net.transitions.data,
            arcs: net.arcs,
        }
    }
}
