//! Error types for the decompilation core.
//!
//! Invariant violations are bugs: the owning procedure is marked failed and
//! the error is never swallowed. Unresolved indirect control and upstream
//! decode misses are *not* errors; they are reported through return values
//! and log messages so that decompilation of the rest of the program can
//! proceed.

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    errors {
        /// A structural invariant of the IR was broken. This always
        /// indicates a bug in a pass or in the upstream decoder.
        InvariantViolation(m: String) {
            description("an IR invariant was violated")
            display("invariant violation: {}", m)
        }
        /// A pass group failed to reach a fixed point within the iteration
        /// cap. Indicates a non-monotone pass.
        PassNonConvergence(group: String, cap: usize) {
            description("a pass group failed to converge")
            display("pass group {} did not converge within {} iterations", group, cap)
        }
        /// The upstream decoder failed for an address the core required.
        DecodeFailure(address: u64) {
            description("the upstream decoder could not produce code")
            display("no decodable code at address 0x{:x}", address)
        }
        /// An external caller set the cancellation flag. Observed between
        /// passes, never inside one.
        Cancelled {
            description("decompilation was cancelled")
            display("decompilation was cancelled")
        }
    }
}
