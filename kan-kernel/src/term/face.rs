use std::collections::BTreeMap;
use std::fmt;

use super::{II, IName};

/// An endpoint of the interval.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Dir {
    Zero,
    One,
}

impl Dir {
    /// The opposite endpoint
    pub fn flip(self) -> Dir {
        match self {
            Dir::Zero => Dir::One,
            Dir::One => Dir::Zero,
        }
    }
}

impl fmt::Display for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dir::Zero => write!(f, "0"),
            Dir::One => write!(f, "1"),
        }
    }
}

/// A face formula: a conjunction of `i = 0/1` constraints on interval
/// variables. The empty conjunction is the total face.
///
/// # Examples
/// ```
/// # use kan_kernel::term::{Dir, Face, IName};
/// let i = IName::src("i");
/// let j = IName::src("j");
/// let f = Face::top().with(i.clone(), Dir::Zero).unwrap();
/// let g = Face::top().with(j.clone(), Dir::One).unwrap();
/// assert!(f.compatible(&g));
/// let fg = f.meet(&g).unwrap();
/// assert_eq!(fg.binds(&i), Some(Dir::Zero));
/// assert_eq!(fg.binds(&j), Some(Dir::One));
/// // Opposite constraints on the same variable never meet.
/// let h = Face::top().with(i.clone(), Dir::One).unwrap();
/// assert!(!f.compatible(&h));
/// assert!(f.meet(&h).is_none());
/// ```
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Face(BTreeMap<IName, Dir>);

impl Face {
    /// The total face: no constraints, true everywhere.
    pub fn top() -> Face {
        Face(BTreeMap::new())
    }

    /// The single constraint `i = d`.
    pub fn eqn(i: IName, d: Dir) -> Face {
        let mut m = BTreeMap::new();
        m.insert(i, d);
        Face(m)
    }

    /// Conjoin the constraint `i = d`.
    ///
    /// Returns `None` if the face already pins `i` to the opposite
    /// endpoint, making the conjunction unsatisfiable.
    pub fn with(mut self, i: IName, d: Dir) -> Option<Face> {
        match self.0.get(&i) {
            Some(&d0) if d0 != d => None,
            _ => {
                self.0.insert(i, d);
                Some(self)
            }
        }
    }

    /// Whether this is the total face.
    pub fn is_top(&self) -> bool {
        self.0.is_empty()
    }

    /// The endpoint this face pins `i` to, if any.
    pub fn binds(&self, i: &IName) -> Option<Dir> {
        self.0.get(i).copied()
    }

    /// The number of constraints.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the face carries no constraints.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the constraints in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (&IName, Dir)> {
        self.0.iter().map(|(i, d)| (i, *d))
    }

    /// Whether two faces can hold at once.
    pub fn compatible(&self, other: &Face) -> bool {
        self.meet(other).is_some()
    }

    /// The conjunction of two faces, or `None` if they conflict.
    pub fn meet(&self, other: &Face) -> Option<Face> {
        let mut out = self.clone();
        for (i, d) in other.iter() {
            out = out.with(i.clone(), d)?;
        }
        Some(out)
    }

    /// Substitute `s` for `i` in this face.
    ///
    /// Returns `None` when the substitution makes the face
    /// unsatisfiable (the constraint on `i` meets the opposite
    /// endpoint), and the reduced face otherwise: a discharged
    /// constraint is dropped, a renamed one is re-keyed.
    pub fn act(&self, i: &IName, s: &II) -> Option<Face> {
        let Some(d) = self.binds(i) else {
            return Some(self.clone());
        };
        let mut rest = self.clone();
        rest.0.remove(i);
        match s {
            II::Dir(d2) if *d2 == d => Some(rest),
            II::Dir(_) => None,
            II::Var(j) => rest.with(j.clone(), d),
        }
    }
}

impl fmt::Display for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_top() {
            return write!(f, "(1=1)");
        }
        for (i, d) in self.iter() {
            write!(f, "({i} = {d})")?;
        }
        Ok(())
    }
}

/// A system of partial elements: face-indexed entries kept in source
/// order. Lookups scan; systems are small.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct System<T>(Vec<(Face, T)>);

impl<T> System<T> {
    pub fn new() -> System<T> {
        System(Vec::new())
    }

    pub fn from_entries(entries: Vec<(Face, T)>) -> System<T> {
        System(entries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (Face, T)> {
        self.0.iter()
    }

    pub fn entries(&self) -> &[(Face, T)] {
        &self.0
    }

    pub fn faces(&self) -> impl Iterator<Item = &Face> {
        self.0.iter().map(|(f, _)| f)
    }

    /// The first entry whose face equals `face`.
    pub fn get(&self, face: &Face) -> Option<&T> {
        self.0.iter().find(|(f, _)| f == face).map(|(_, t)| t)
    }

    /// Rebuild the system entrywise, propagating failure.
    pub fn try_map_ref<U, E>(
        &self,
        mut f: impl FnMut(&Face, &T) -> Result<U, E>,
    ) -> Result<System<U>, E> {
        let mut out = Vec::with_capacity(self.0.len());
        for (face, t) in &self.0 {
            out.push((face.clone(), f(face, t)?));
        }
        Ok(System(out))
    }
}

impl<T> Default for System<T> {
    fn default() -> Self {
        System::new()
    }
}

impl<T> FromIterator<(Face, T)> for System<T> {
    fn from_iter<I: IntoIterator<Item = (Face, T)>>(iter: I) -> Self {
        System(iter.into_iter().collect())
    }
}

impl<'a, T> IntoIterator for &'a System<T> {
    type Item = &'a (Face, T);
    type IntoIter = std::slice::Iter<'a, (Face, T)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i() -> IName {
        IName::src("i")
    }

    fn j() -> IName {
        IName::src("j")
    }

    #[test]
    fn top_meets_everything() {
        let f = Face::eqn(i(), Dir::Zero);
        assert_eq!(Face::top().meet(&f), Some(f.clone()));
        assert_eq!(f.meet(&Face::top()), Some(f));
    }

    #[test]
    fn act_discharges_and_contradicts() {
        let f = Face::eqn(i(), Dir::Zero);
        assert_eq!(f.act(&i(), &II::Dir(Dir::Zero)), Some(Face::top()));
        assert_eq!(f.act(&i(), &II::Dir(Dir::One)), None);
        let renamed = f.act(&i(), &II::Var(j())).unwrap();
        assert_eq!(renamed, Face::eqn(j(), Dir::Zero));
    }

    #[test]
    fn act_rename_onto_conflict() {
        let f = Face::eqn(i(), Dir::Zero).with(j(), Dir::One).unwrap();
        // i renamed to j pins j to both endpoints at once
        assert_eq!(f.act(&i(), &II::Var(j())), None);
    }
}
