//! Runner scenarios driven through mock loaders and processors.

mod helpers;

mod indexing;
