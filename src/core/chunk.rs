#[derive(Debug, PartialEq)]
pub enum ChunkStatus {
    /// The chunk pulled `chunk_size` items from the reader
    Full,
    /// The reader reached the end of its stream while filling the chunk
    Finished,
}

/// Items of one commit interval, in reader order.
///
/// `pulled` counts every item taken from the reader for this chunk,
/// including the ones that were skipped and never reached `items`.
pub struct Chunk<O> {
    items: Vec<O>,
    pulled: usize,
    chunk_size: usize,
}

impl<O> Chunk<O> {
    pub fn new(chunk_size: usize) -> Chunk<O> {
        Chunk {
            items: Vec::with_capacity(chunk_size),
            pulled: 0,
            chunk_size,
        }
    }

    /// Records one pull from the reader.
    pub fn pull(&mut self) {
        self.pulled += 1;
    }

    /// Adds a processed item. Must follow the `pull` of its source item.
    pub fn add_item(&mut self, item: O) {
        self.items.push(item);
    }

    pub fn is_full(&self) -> bool {
        self.pulled >= self.chunk_size
    }

    pub fn get_items(&self) -> &[O] {
        &self.items
    }

    pub fn pulled(&self) -> usize {
        self.pulled
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::Chunk;

    #[test]
    fn chunk_should_be_full_after_chunk_size_pulls() {
        let mut chunk = Chunk::new(2);

        chunk.pull();
        chunk.add_item("Split");
        assert!(!chunk.is_full());

        chunk.pull();
        assert!(chunk.is_full());
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk.pulled(), 2);
    }

    #[test]
    fn chunk_should_keep_reader_order() {
        let mut chunk = Chunk::new(3);

        for city in ["Zagreb", "Split", "Rijeka"] {
            chunk.pull();
            chunk.add_item(city);
        }

        assert_eq!(chunk.get_items(), &["Zagreb", "Split", "Rijeka"]);
    }
}
