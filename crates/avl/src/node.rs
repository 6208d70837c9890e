//! Height-balanced node algebra
//!
//! Free functions over `Option<Box<Node>>` links. Every search takes a
//! [`Probe`], so one descent routine serves identifier lookups, exact
//! revision lookups, and the open/closed boundary probes. Rebalancing is the
//! textbook four-case rotation scheme driven by balance factors; it repairs
//! both insert and extract paths.
//!
//! The height of an empty subtree is zero and a singleton is one, so
//! `1 << height` is an upper bound on subtree size. The weighted sampler
//! leans on that bound instead of storing per-node counts.

use std::cmp::Ordering;
use std::ops::ControlFlow;

use canopy_core::{Element, Entry, Probe};
use rand::Rng;

/// An owned subtree.
pub(crate) type Link<E> = Option<Box<Node<E>>>;

/// One tree node. Layout is managed entirely by the algebra below; the
/// owning tree only ever touches the root link.
pub(crate) struct Node<E> {
    pub(crate) entry: Entry<E>,
    pub(crate) left: Link<E>,
    pub(crate) right: Link<E>,
    pub(crate) height: i16,
}

impl<E> Node<E> {
    fn leaf(entry: Entry<E>) -> Self {
        Node {
            entry,
            left: None,
            right: None,
            height: 1,
        }
    }
}

pub(crate) fn height<E>(link: &Link<E>) -> i16 {
    link.as_deref().map_or(0, |node| node.height)
}

fn balance<E>(node: &Node<E>) -> i16 {
    height(&node.left) - height(&node.right)
}

fn update_height<E>(node: &mut Node<E>) {
    node.height = 1 + height(&node.left).max(height(&node.right));
}

fn rotate_right<E>(link: &mut Link<E>) {
    if let Some(mut y) = link.take() {
        match y.left.take() {
            Some(mut x) => {
                y.left = x.right.take();
                update_height(&mut y);
                x.right = Some(y);
                update_height(&mut x);
                *link = Some(x);
            }
            None => *link = Some(y),
        }
    }
}

fn rotate_left<E>(link: &mut Link<E>) {
    if let Some(mut x) = link.take() {
        match x.right.take() {
            Some(mut y) => {
                x.right = y.left.take();
                update_height(&mut x);
                y.left = Some(x);
                update_height(&mut y);
                *link = Some(y);
            }
            None => *link = Some(x),
        }
    }
}

/// Refresh the root's height and repair a possible single-level imbalance.
/// The four cases: left-left and right-right take one rotation, left-right
/// and right-left rotate the child first.
fn rebalance<E>(link: &mut Link<E>) {
    let Some(node) = link.as_deref_mut() else {
        return;
    };
    update_height(node);
    let factor = balance(node);
    if factor > 1 {
        if node.left.as_deref().map_or(0, balance) < 0 {
            rotate_left(&mut node.left);
        }
        rotate_right(link);
    } else if factor < -1 {
        if node.right.as_deref().map_or(0, balance) > 0 {
            rotate_right(&mut node.right);
        }
        rotate_left(link);
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

pub(crate) fn find<'a, E: Element, P: Probe<E>>(
    link: &'a Link<E>,
    probe: &P,
) -> Option<&'a Node<E>> {
    let mut cursor = link;
    while let Some(node) = cursor.as_deref() {
        match probe.cmp_entry(&node.entry) {
            Ordering::Less => cursor = &node.left,
            Ordering::Greater => cursor = &node.right,
            Ordering::Equal => return Some(node),
        }
    }
    None
}

pub(crate) fn find_mut<'a, E: Element, P: Probe<E>>(
    link: &'a mut Link<E>,
    probe: &P,
) -> Option<&'a mut Node<E>> {
    let node = link.as_deref_mut()?;
    match probe.cmp_entry(&node.entry) {
        Ordering::Less => find_mut(&mut node.left, probe),
        Ordering::Greater => find_mut(&mut node.right, probe),
        Ordering::Equal => Some(node),
    }
}

/// First node whose entry is greater than or equal to the probe.
pub(crate) fn lower_bound<'a, E: Element, P: Probe<E>>(
    link: &'a Link<E>,
    probe: &P,
) -> Option<&'a Node<E>> {
    let mut successor = None;
    let mut cursor = link;
    while let Some(node) = cursor.as_deref() {
        match probe.cmp_entry(&node.entry) {
            Ordering::Less | Ordering::Equal => {
                successor = Some(node);
                cursor = &node.left;
            }
            Ordering::Greater => cursor = &node.right,
        }
    }
    successor
}

/// First node whose entry is strictly greater than the probe.
///
/// Used for single-pass forward iteration: the caller steps with the last
/// entry it saw and never needs a parent pointer or a path stack.
pub(crate) fn upper_bound<'a, E: Element, P: Probe<E>>(
    link: &'a Link<E>,
    probe: &P,
) -> Option<&'a Node<E>> {
    let mut successor = None;
    let mut cursor = link;
    while let Some(node) = cursor.as_deref() {
        match probe.cmp_entry(&node.entry) {
            Ordering::Less => {
                successor = Some(node);
                cursor = &node.left;
            }
            Ordering::Greater | Ordering::Equal => cursor = &node.right,
        }
    }
    successor
}

pub(crate) fn find_min<E>(link: &Link<E>) -> Option<&Node<E>> {
    let mut node = link.as_deref()?;
    while let Some(left) = node.left.as_deref() {
        node = left;
    }
    Some(node)
}

pub(crate) fn find_max<E>(link: &Link<E>) -> Option<&Node<E>> {
    let mut node = link.as_deref()?;
    while let Some(right) = node.right.as_deref() {
        node = right;
    }
    Some(node)
}

/// The shallowest node on which the descent paths of `a` and `b` diverge.
pub(crate) fn lowest_common_ancestor<'a, E, A, B>(
    link: &'a Link<E>,
    a: &A,
    b: &B,
) -> Option<&'a Node<E>>
where
    E: Element,
    A: Probe<E>,
    B: Probe<E>,
{
    let node = link.as_deref()?;
    let a_side = a.cmp_entry(&node.entry);
    let b_side = b.cmp_entry(&node.entry);
    if a_side == Ordering::Less && b_side == Ordering::Less {
        lowest_common_ancestor(&node.left, a, b)
    } else if a_side == Ordering::Greater && b_side == Ordering::Greater {
        lowest_common_ancestor(&node.right, a, b)
    } else {
        Some(node)
    }
}

// ---------------------------------------------------------------------------
// Interval traversal
// ---------------------------------------------------------------------------

/// Boundary nodes of an interval traversal.
pub(crate) struct NodeEnds<'a, E> {
    pub(crate) first: Option<&'a Node<E>>,
    pub(crate) last: Option<&'a Node<E>>,
    pub(crate) ancestor: Option<&'a Node<E>>,
}

impl<E> Default for NodeEnds<'_, E> {
    fn default() -> Self {
        NodeEnds {
            first: None,
            last: None,
            ancestor: None,
        }
    }
}

/// In-order traversal of the closed probe interval `[lo, hi]`, invoking the
/// callback in ascending order. Returns the leftmost and rightmost matching
/// nodes and their lowest common ancestor (the shallowest in-interval node).
pub(crate) fn range_ends<'a, E, L, H, F>(
    link: &'a Link<E>,
    lo: &L,
    hi: &H,
    f: &mut F,
) -> NodeEnds<'a, E>
where
    E: Element,
    L: Probe<E>,
    H: Probe<E>,
    F: FnMut(&'a Entry<E>),
{
    let Some(node) = link.as_deref() else {
        return NodeEnds::default();
    };
    let below_lo = lo.cmp_entry(&node.entry) == Ordering::Greater;
    let above_hi = hi.cmp_entry(&node.entry) == Ordering::Less;
    if !below_lo && !above_hi {
        let left = range_ends(&node.left, lo, hi, f);
        f(&node.entry);
        let right = range_ends(&node.right, lo, hi, f);
        NodeEnds {
            first: left.first.or(Some(node)),
            last: right.last.or(Some(node)),
            ancestor: Some(node),
        }
    } else if below_lo {
        range_ends(&node.right, lo, hi, f)
    } else {
        range_ends(&node.left, lo, hi, f)
    }
}

/// Interval traversal with early exit. The callback's entry borrows live as
/// long as the tree borrow, so callers may retain references.
pub(crate) fn try_for_range<'a, E, L, H, F>(
    link: &'a Link<E>,
    lo: &L,
    hi: &H,
    f: &mut F,
) -> ControlFlow<()>
where
    E: Element,
    L: Probe<E>,
    H: Probe<E>,
    F: FnMut(&'a Entry<E>) -> ControlFlow<()>,
{
    let Some(node) = link.as_deref() else {
        return ControlFlow::Continue(());
    };
    let below_lo = lo.cmp_entry(&node.entry) == Ordering::Greater;
    let above_hi = hi.cmp_entry(&node.entry) == Ordering::Less;
    if !below_lo && !above_hi {
        try_for_range(&node.left, lo, hi, f)?;
        f(&node.entry)?;
        try_for_range(&node.right, lo, hi, f)
    } else if below_lo {
        try_for_range(&node.right, lo, hi, f)
    } else {
        try_for_range(&node.left, lo, hi, f)
    }
}

/// Mutable interval traversal. Callbacks must not change an entry's
/// identifier or generation; both participate in the tree order.
pub(crate) fn for_range_mut<E, L, H, F>(
    link: &mut Link<E>,
    lo: &L,
    hi: &H,
    f: &mut F,
) -> ControlFlow<()>
where
    E: Element,
    L: Probe<E>,
    H: Probe<E>,
    F: FnMut(&mut Entry<E>) -> ControlFlow<()>,
{
    let Some(node) = link.as_deref_mut() else {
        return ControlFlow::Continue(());
    };
    let below_lo = lo.cmp_entry(&node.entry) == Ordering::Greater;
    let above_hi = hi.cmp_entry(&node.entry) == Ordering::Less;
    if !below_lo && !above_hi {
        for_range_mut(&mut node.left, lo, hi, f)?;
        f(&mut node.entry)?;
        for_range_mut(&mut node.right, lo, hi, f)
    } else if below_lo {
        for_range_mut(&mut node.right, lo, hi, f)
    } else {
        for_range_mut(&mut node.left, lo, hi, f)
    }
}

// ---------------------------------------------------------------------------
// Insertion and removal
// ---------------------------------------------------------------------------

/// Insert an entry at its `(identifier, generation)` position. Returns false
/// without overwriting when that exact revision is already present.
pub(crate) fn insert<E: Element>(link: &mut Link<E>, entry: Entry<E>) -> bool {
    let revision = entry.revision_id();
    insert_at(link, entry, &revision)
}

fn insert_at<E: Element>(
    link: &mut Link<E>,
    entry: Entry<E>,
    revision: &canopy_core::RevisionId<E::Id>,
) -> bool {
    let Some(node) = link.as_deref_mut() else {
        *link = Some(Box::new(Node::leaf(entry)));
        return true;
    };
    let inserted = match canopy_core::Dated(revision).cmp_entry(&node.entry) {
        Ordering::Less => insert_at(&mut node.left, entry, revision),
        Ordering::Greater => insert_at(&mut node.right, entry, revision),
        Ordering::Equal => false,
    };
    if inserted {
        rebalance(link);
    }
    inserted
}

/// Find the probe's match and extract its node, repairing balance on the way
/// back up. A two-child node is replaced by its in-order successor.
pub(crate) fn extract<E: Element, P: Probe<E>>(
    link: &mut Link<E>,
    probe: &P,
) -> Option<Box<Node<E>>> {
    let ord = probe.cmp_entry(&link.as_deref()?.entry);
    let extracted = match ord {
        Ordering::Equal => detach(link),
        Ordering::Less => {
            let node = link.as_deref_mut()?;
            extract(&mut node.left, probe)
        }
        Ordering::Greater => {
            let node = link.as_deref_mut()?;
            extract(&mut node.right, probe)
        }
    };
    if extracted.is_some() {
        rebalance(link);
    }
    extracted
}

fn detach<E: Element>(link: &mut Link<E>) -> Option<Box<Node<E>>> {
    let mut node = link.take()?;
    match (node.left.take(), node.right.take()) {
        (None, None) => {}
        (Some(left), None) => *link = Some(left),
        (None, Some(right)) => *link = Some(right),
        (Some(left), Some(right)) => {
            let mut remainder: Link<E> = Some(right);
            if let Some(mut successor) = extract_min(&mut remainder) {
                successor.left = Some(left);
                successor.right = remainder;
                let mut replacement = Some(successor);
                rebalance(&mut replacement);
                *link = replacement;
            }
        }
    }
    node.height = 1;
    Some(node)
}

fn extract_min<E: Element>(link: &mut Link<E>) -> Option<Box<Node<E>>> {
    if link.as_deref()?.left.is_some() {
        let node = link.as_deref_mut()?;
        let out = extract_min(&mut node.left);
        rebalance(link);
        out
    } else {
        let mut node = link.take()?;
        *link = node.right.take();
        node.height = 1;
        Some(node)
    }
}

/// Drain every node of the subtree bottom-up.
pub(crate) fn take_each<E, F: FnMut(Box<Node<E>>)>(link: &mut Link<E>, f: &mut F) {
    if let Some(mut node) = link.take() {
        take_each(&mut node.left, f);
        take_each(&mut node.right, f);
        f(node);
    }
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// Weighted random descent. Uses `1 << height` as the subtree-size upper
/// bound, so the distribution is approximate: deep subtrees are favored.
/// Callers needing uniformity should use [`sample_range`].
pub(crate) fn sample<'a, E, R>(link: &'a Link<E>, rng: &mut R) -> Option<&'a Node<E>>
where
    R: Rng + ?Sized,
{
    let mut cursor = link;
    while let Some(node) = cursor.as_deref() {
        let count_left = node.left.as_deref().map_or(0u64, |n| 1u64 << n.height);
        let count_right = node.right.as_deref().map_or(0u64, |n| 1u64 << n.height);
        let total = count_left + count_right + 1;
        let choice = rng.gen_range(0..=total + 1);
        if choice == 0 {
            return Some(node);
        }
        cursor = if choice > count_left + 1 {
            &node.right
        } else {
            &node.left
        };
    }
    None
}

/// Uniform sample of the predicate-matching entries inside the closed probe
/// interval. Two passes: count the matches, then re-traverse to the chosen
/// index. No per-node metadata, no allocation.
pub(crate) fn sample_range<'a, E, L, H, R, P>(
    link: &'a Link<E>,
    lo: &L,
    hi: &H,
    rng: &mut R,
    predicate: P,
) -> Option<&'a Entry<E>>
where
    E: Element,
    L: Probe<E>,
    H: Probe<E>,
    R: Rng + ?Sized,
    P: Fn(&Entry<E>) -> bool,
{
    let mut matches = 0usize;
    let _ = try_for_range(link, lo, hi, &mut |entry| {
        if predicate(entry) {
            matches += 1;
        }
        ControlFlow::Continue(())
    });
    if matches == 0 {
        return None;
    }

    let mut index = rng.gen_range(0..matches);
    let mut picked = None;
    let _ = try_for_range(link, lo, hi, &mut |entry| {
        if !predicate(entry) {
            return ControlFlow::Continue(());
        }
        if index == 0 {
            picked = Some(entry);
            return ControlFlow::Break(());
        }
        index -= 1;
        ControlFlow::Continue(())
    });
    picked
}
