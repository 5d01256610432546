#[macro_export]
macro_rules! trace(
    ( $($thing:expr),* ) => { if cfg!(test) { println! { $($thing),* } } };
);

// Report a fatal condition on stderr and terminate the process. This is
// the drivers' last resort: library code returns its errors instead.
#[macro_export]
macro_rules! fatal(
    ( $($thing:expr),* ) => {{
        eprintln! { $($thing),* }
        std::process::exit(1)
    }};
);
