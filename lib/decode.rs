//! The contracts kestrel expects from its upstream collaborators: the
//! instruction decoder and the library signature database.
//!
//! Decoding on demand during switch recovery is a synchronous upcall
//! through `Decoder`; if the implementation is I/O-bound, the calling
//! pass stalls, which is acceptable.

use error::*;
use il::*;

/// One decoded RTL: the statements lifted from a single source address.
#[derive(Clone, Debug)]
pub struct DecodedRtl {
    pub address: u64,
    pub statements: Vec<StatementKind>
}

/// The result of decoding at an address.
#[derive(Clone, Debug)]
pub enum DecodeResult {
    /// The basic block starting at the requested address.
    Block {
        rtls: Vec<DecodedRtl>,
        /// The address following the block, for fall-through and
        /// call-return edges. `None` when the block cannot fall
        /// through.
        fall_through: Option<u64>
    },
    /// The address does not hold code.
    NotCode
}

/// The upstream instruction decoder.
///
/// `decode_at` must be idempotent per address; the core calls it at most
/// once per address unless the CFG is explicitly invalidated.
pub trait Decoder {
    fn decode_at(&mut self, address: u64) -> Result<DecodeResult>;
}

/// The library signature database: named signatures with parameters,
/// returns, preservations, calling convention, and variadic status.
pub trait SignatureDatabase {
    fn signature_for(&self, name: &str) -> Option<Signature>;
}


impl Program {
    /// Pull the named signatures from an external database into this
    /// program's library stubs. Returns how many were found.
    pub fn import_library_signatures(
        &mut self,
        database: &dyn SignatureDatabase,
        names: &[&str]
    ) -> usize {
        let mut imported = 0;
        for name in names {
            match database.signature_for(name) {
                Some(signature) => {
                    self.add_library_signature(signature);
                    imported += 1;
                },
                None => debug!("no library signature for {}", name)
            }
        }
        imported
    }
}


impl Procedure {
    /// Materialize a decoded basic block as a new fragment of this
    /// procedure. The fragment kind is taken from the terminal statement.
    pub fn append_decoded_fragment(&mut self, rtls: Vec<DecodedRtl>)
        -> Result<FragmentId> {

        let kind = rtls.last()
            .and_then(|rtl| rtl.statements.last())
            .map(|terminal| match *terminal {
                StatementKind::Call(_) => FragmentKind::Call,
                StatementKind::Return(_) => FragmentKind::Ret,
                StatementKind::Goto(_) | StatementKind::Branch(_) =>
                    FragmentKind::Taken,
                _ => FragmentKind::Fall
            })
            .unwrap_or(FragmentKind::Fall);

        let fragment = self.add_fragment(kind);
        for rtl in rtls {
            self.start_rtl(fragment, rtl.address)?;
            for statement in rtl.statements {
                self.append_statement(fragment, statement)?;
            }
        }
        Ok(fragment)
    }

    /// The fragment beginning at the given source address, if one exists.
    pub fn fragment_at(&self, address: u64) -> Option<FragmentId> {
        self.cfg().fragments()
            .into_iter()
            .find(|fragment| fragment.address() == Some(address))
            .map(|fragment| fragment.index())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use analysis::calling_convention::CallingConventionType;
    use il::*;

    struct OneEntryDatabase;

    impl SignatureDatabase for OneEntryDatabase {
        fn signature_for(&self, name: &str) -> Option<Signature> {
            if name == "strlen" {
                let mut signature =
                    Signature::new("strlen", CallingConventionType::Cdecl);
                signature.add_return(reg(24), ::types::Type::unsigned(32));
                Some(signature)
            }
            else {
                None
            }
        }
    }

    #[test]
    fn library_signatures_import_from_a_database() {
        let mut program = Program::new("test", Image::empty());
        let imported = program.import_library_signatures(
            &OneEntryDatabase, &["strlen", "frobnicate"]);
        assert_eq!(imported, 1);
        assert!(program.library_signature("strlen").is_some());
        assert!(program.library_signature("frobnicate").is_none());
    }

    #[test]
    fn decoded_fragments_take_their_kind_from_the_terminal() {
        let mut proc =
            Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let fragment = proc.append_decoded_fragment(vec![
            DecodedRtl {
                address: 0x1000,
                statements: vec![
                    StatementKind::Assign(Assign::new(
                        reg(24), expr_const(1, 32)))
                ]
            },
            DecodedRtl {
                address: 0x1001,
                statements: vec![
                    StatementKind::Return(ReturnStatement::new())
                ]
            }
        ]).unwrap();
        assert_eq!(proc.cfg().fragment(fragment).unwrap().kind(),
                   FragmentKind::Ret);
        assert_eq!(proc.fragment_at(0x1000), Some(fragment));
        assert_eq!(proc.fragment_at(0x2000), None);
    }
}
