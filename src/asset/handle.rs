use std::marker::PhantomData;

/// Index into an `AssetCache<T>`, typed so mesh and material handles cannot
/// be mixed up.
#[derive(Debug)]
pub struct Handle<T> {
    index: usize,
    _marker: PhantomData<*const T>,
}

// Clone/Copy/Eq/Hash/Send/Sync regardless of T; the PhantomData pointer is
// never dereferenced.
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

unsafe impl<T> Send for Handle<T> {}
unsafe impl<T> Sync for Handle<T> {}

impl<T> Handle<T> {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_is_copy() {
        let h1: Handle<String> = Handle::new(5);
        let h2 = h1;
        assert_eq!(h1.index(), h2.index());
    }
}
