//! macchiato is a tiny JVM: it loads a single class file compiled from a
//! restricted integer subset of Java and interprets its bytecode.

pub mod bytecode;
pub mod heap;
pub mod jvm;
pub mod program;
pub mod runtime;
