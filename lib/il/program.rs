//! A program is a set of procedures plus the loaded image and the
//! signatures of library procedures.

use analysis::calling_convention::CallingConventionType;
use il::*;
use std::collections::BTreeMap;
use types::Endian;

/// A read-only view of the loaded program image. Switch-table recovery
/// reads code pointers out of it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Image {
    base: u64,
    data: Vec<u8>,
    endian: Endian
}

impl Image {
    pub fn new(base: u64, data: Vec<u8>, endian: Endian) -> Image {
        Image { base: base, data: data, endian: endian }
    }

    /// An empty image; every read misses.
    pub fn empty() -> Image {
        Image::new(0, Vec::new(), Endian::Little)
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the address lies inside the image.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base
            && address < self.base + self.data.len() as u64
    }

    /// Read a single byte at the given address.
    pub fn read_byte(&self, address: u64) -> Option<u8> {
        if address < self.base {
            return None;
        }
        self.data.get((address - self.base) as usize).cloned()
    }

    /// Read a 32-bit word at the given address, or `None` if any byte
    /// falls outside the image.
    pub fn read_word(&self, address: u64) -> Option<u64> {
        if address < self.base {
            return None;
        }
        let offset = (address - self.base) as usize;
        if offset + 4 > self.data.len() {
            return None;
        }
        let bytes = &self.data[offset..offset + 4];
        let word = match self.endian {
            Endian::Little =>
                (bytes[0] as u64)
                    | (bytes[1] as u64) << 8
                    | (bytes[2] as u64) << 16
                    | (bytes[3] as u64) << 24,
            Endian::Big =>
                (bytes[3] as u64)
                    | (bytes[2] as u64) << 8
                    | (bytes[1] as u64) << 16
                    | (bytes[0] as u64) << 24
        };
        Some(word)
    }
}


/// The set of procedures under decompilation, the image they were loaded
/// from, library procedure stubs, and the inter-procedural preservation
/// cache.
///
/// The procedure table and the preservation cache are the only mutable
/// state shared across procedures. They are read-mostly; when procedures
/// are decompiled in parallel, the outer scheduler must synchronize
/// writes, which only occur at pass boundaries.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Program {
    name: String,
    image: Image,
    procedures: BTreeMap<u64, Procedure>,
    library: BTreeMap<String, Signature>,
    preservation: BTreeMap<u64, Vec<(Expression, Expression)>>
}

impl Program {
    pub fn new<S: Into<String>>(name: S, image: Image) -> Program {
        Program {
            name: name.into(),
            image: image,
            procedures: BTreeMap::new(),
            library: BTreeMap::new(),
            preservation: BTreeMap::new()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Create a procedure at the given address, or return the existing
    /// one's address.
    pub fn create_procedure<S: Into<String>>(
        &mut self,
        address: u64,
        name: S,
        convention: CallingConventionType
    ) -> &mut Procedure {
        self.procedures.entry(address)
            .or_insert_with(|| Procedure::new(name, address, convention))
    }

    pub fn procedure(&self, address: u64) -> Option<&Procedure> {
        self.procedures.get(&address)
    }

    pub fn procedure_mut(&mut self, address: u64) -> Option<&mut Procedure> {
        self.procedures.get_mut(&address)
    }

    pub fn has_procedure(&self, address: u64) -> bool {
        self.procedures.contains_key(&address)
    }

    pub fn procedures(&self) -> &BTreeMap<u64, Procedure> {
        &self.procedures
    }

    pub fn procedure_addresses(&self) -> Vec<u64> {
        self.procedures.keys().cloned().collect()
    }

    /// Take a procedure out of the table for exclusive mutation. Pair
    /// with `put_procedure`.
    pub fn take_procedure(&mut self, address: u64) -> Option<Procedure> {
        self.procedures.remove(&address)
    }

    pub fn put_procedure(&mut self, procedure: Procedure) {
        self.procedures.insert(procedure.address(), procedure);
    }

    pub fn add_library_signature(&mut self, signature: Signature) {
        self.library.insert(signature.name().to_string(), signature);
    }

    /// The signature of a library procedure stub, by name.
    pub fn library_signature(&self, name: &str) -> Option<&Signature> {
        self.library.get(name)
    }

    /// The proven preservations of a procedure, from the inter-procedural
    /// cache.
    pub fn preservation(&self, address: u64)
        -> Option<&Vec<(Expression, Expression)>> {

        self.preservation.get(&address)
    }

    pub fn set_preservation(
        &mut self,
        address: u64,
        proven: Vec<(Expression, Expression)>
    ) {
        self.preservation.insert(address, proven);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use types::Endian;

    #[test]
    fn image_reads_words_in_either_byte_order() {
        let data = vec![0x00, 0x20, 0x00, 0x00, 0x10, 0x20, 0x00, 0x00];
        let image = Image::new(0x10000, data.clone(), Endian::Little);
        assert_eq!(image.read_word(0x10000), Some(0x2000));
        assert_eq!(image.read_word(0x10004), Some(0x2010));
        assert_eq!(image.read_word(0x10006), None);
        assert_eq!(image.read_word(0xffff), None);

        let image = Image::new(0x10000, data, Endian::Big);
        assert_eq!(image.read_word(0x10000), Some(0x00200000));
    }
}
