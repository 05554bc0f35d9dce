/// A disjoint-set forest with union by size and path compression.
///
/// Every pixel of the binarized image owns one slot; slots start unassigned and
/// become their own root on first access.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<u32>,
    size: Vec<u32>,
}

const UNSET: u32 = u32::MAX;

impl UnionFind {
    /// Creates a new structure holding `len` singleton sets.
    pub fn new(len: usize) -> Self {
        Self {
            parent: vec![UNSET; len],
            size: vec![1; len],
        }
    }

    /// Returns the representative (root) of the set containing `id`.
    pub fn get_representative(&mut self, id: usize) -> usize {
        let mut root = self.parent[id];

        if root == UNSET {
            self.parent[id] = id as u32;
            return id;
        }

        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }

        let mut id = id as u32;
        while self.parent[id as usize] != root {
            let next = self.parent[id as usize];
            self.parent[id as usize] = root;
            id = next;
        }

        root as usize
    }

    /// Returns the number of elements in the set containing `id`.
    pub fn get_set_size(&mut self, id: usize) -> usize {
        let root = self.get_representative(id);
        self.size[root] as usize
    }

    /// Unites the sets containing `aid` and `bid`, returning the new representative.
    pub fn connect(&mut self, aid: usize, bid: usize) -> usize {
        let aroot = self.get_representative(aid);
        let broot = self.get_representative(bid);

        if aroot == broot {
            return aroot;
        }

        let (big, small) = if self.size[aroot] >= self.size[broot] {
            (aroot, broot)
        } else {
            (broot, aroot)
        };

        self.parent[small] = big as u32;
        self.size[big] += self.size[small];

        big
    }

    /// Resets every slot to an unassigned singleton.
    pub fn reset(&mut self) {
        self.parent.fill(UNSET);
        self.size.fill(1);
    }

    /// Returns the number of elements in the structure.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Returns `true` if the structure holds no elements.
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_representative() {
        let mut uf = UnionFind::new(10);

        assert_eq!(uf.get_representative(0), 0);
        assert_eq!(uf.get_representative(5), 5);
        assert_eq!(uf.get_set_size(5), 1);
    }

    #[test]
    fn test_connect() {
        let mut uf = UnionFind::new(10);

        uf.connect(0, 1);
        assert_eq!(uf.get_representative(0), uf.get_representative(1));

        uf.connect(1, 2);
        uf.connect(3, 4);
        assert_ne!(uf.get_representative(0), uf.get_representative(3));

        uf.connect(0, 3);
        assert_eq!(uf.get_representative(2), uf.get_representative(4));
        assert_eq!(uf.get_set_size(4), 5);
        assert_eq!(uf.get_set_size(9), 1);
    }

    #[test]
    fn test_reset() {
        let mut uf = UnionFind::new(10);
        uf.connect(0, 1);
        uf.connect(2, 3);

        uf.reset();

        assert!(uf.parent.iter().all(|&p| p == UNSET));
        assert_eq!(uf.get_set_size(1), 1);
        assert_eq!(uf.len(), 10);
    }
}
