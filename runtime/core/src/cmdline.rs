// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2022 Takashi Sakamoto

use {super::*, clap::Parser};

pub trait ServiceCmd<A, T, R>: Sized
where
    A: Parser,
    R: RuntimeOperation<T>,
{
    fn params(args: &A) -> (T, Option<LogLevel>);

    fn run() {
        // NOTE: clap(v3.2.20)::Parser::parse() can exit process with 2 when detecting any error
        // or printing help.
        let args = A::parse();
        let (params, log_level) = Self::params(&args);

        crate::logging::init(log_level.unwrap_or_default());

        let code = R::new(params, log_level)
            .and_then(|mut runtime| {
                runtime.listen()?;
                runtime.run()?;
                Ok(0)
            })
            .unwrap_or_else(|err| {
                eprintln!("{}", err);
                1
            });

        std::process::exit(code)
    }
}
